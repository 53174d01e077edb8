// Router/Guard - paths to pages, with the setup guard
// The guard reads the session store on every navigation; nothing is cached

use crate::error::Result;
use crate::session::{Role, Session, SessionStore};
use tracing::debug;

/// Pages that can actually be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Setup,
    Kid,
    Parent,
}

impl Page {
    pub fn title(&self) -> &str {
        match self {
            Page::Setup => "Setup",
            Page::Kid => "Kid",
            Page::Parent => "Parent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Setup,
    Kid,
    Parent,
    Root,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Setup => "/setup",
            Route::Kid => "/kid",
            Route::Parent => "/parent",
            Route::Root => "/",
        }
    }

    /// `None` for paths with no route; callers send those to root.
    pub fn from_path(path: &str) -> Option<Route> {
        let trimmed = path.trim_end_matches('/');
        match trimmed {
            "" => Some(Route::Root),
            "/setup" => Some(Route::Setup),
            "/kid" => Some(Route::Kid),
            "/parent" => Some(Route::Parent),
            _ => None,
        }
    }

    pub fn is_guarded(&self) -> bool {
        !matches!(self, Route::Setup)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Render(Page),
    /// Always replaces the current history entry.
    Redirect(Route),
}

/// One navigation step, as a pure function of the session contents.
pub fn decide(route: Option<Route>, session: &Session) -> Decision {
    let route = match route {
        Some(route) => route,
        None => return Decision::Redirect(Route::Root),
    };

    if route.is_guarded() && !session.is_complete() {
        return Decision::Redirect(Route::Setup);
    }

    match route {
        Route::Setup => Decision::Render(Page::Setup),
        Route::Kid => Decision::Render(Page::Kid),
        Route::Parent => Decision::Render(Page::Parent),
        Route::Root => match session.role {
            Some(Role::Kid) => Decision::Redirect(Route::Kid),
            _ => Decision::Redirect(Route::Parent),
        },
    }
}

// Redirect chains are at most three long (unknown -> / -> /setup)
const MAX_REDIRECTS: usize = 8;

/// History stack plus the session handle the guard reads through.
pub struct Router {
    session: SessionStore,
    history: Vec<String>,
}

impl Router {
    pub fn new(session: SessionStore) -> Self {
        Self {
            session,
            history: Vec::new(),
        }
    }

    /// Push `path`, then follow redirects (each replacing the top entry)
    /// until a page renders.
    pub fn navigate(&mut self, path: &str) -> Result<Page> {
        self.history.push(path.to_string());
        self.resolve_top()
    }

    /// Like `navigate` but replaces the current entry.
    pub fn replace(&mut self, path: &str) -> Result<Page> {
        self.history.pop();
        self.history.push(path.to_string());
        self.resolve_top()
    }

    /// Pop one entry and re-resolve what is underneath; `None` when there is
    /// nowhere to go back to.
    pub fn back(&mut self) -> Result<Option<Page>> {
        if self.history.len() < 2 {
            return Ok(None);
        }
        self.history.pop();
        self.resolve_top().map(Some)
    }

    pub fn current_path(&self) -> Option<&str> {
        self.history.last().map(String::as_str)
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    fn resolve_top(&mut self) -> Result<Page> {
        for _ in 0..MAX_REDIRECTS {
            let path = self.history.last().cloned().unwrap_or_else(|| "/".to_string());
            let session = self.session.load()?;

            match decide(Route::from_path(&path), &session) {
                Decision::Render(page) => {
                    debug!(path = %path, page = page.title(), "route rendered");
                    return Ok(page);
                }
                Decision::Redirect(to) => {
                    debug!(from = %path, to = to.path(), "route redirected");
                    self.history.pop();
                    self.history.push(to.path().to_string());
                }
            }
        }

        // Setup is never guarded, so it always terminates the chain
        self.history.pop();
        self.history.push(Route::Setup.path().to_string());
        Ok(Page::Setup)
    }
}
