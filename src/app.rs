// App shell - current page, router and outgoing calls
//
// Every mount of a page gets a fresh id. Calls leave tagged with the id of
// the mount that issued them; a reply whose id no longer matches is dropped,
// so a slow response can never land in a page the user already left.

use crate::client::LedgerApi;
use crate::config::LedgerConfig;
use crate::error::Result;
use crate::router::{Page, Router};
use crate::session::SessionStore;
use crate::views::{Call, Effect, KidView, ParentView, Reply, SetupView};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::debug;

pub enum Screen {
    Setup(SetupView),
    Kid(KidView),
    Parent(ParentView),
}

impl Screen {
    pub fn page(&self) -> Page {
        match self {
            Screen::Setup(_) => Page::Setup,
            Screen::Kid(_) => Page::Kid,
            Screen::Parent(_) => Page::Parent,
        }
    }

    fn on_reply(&mut self, reply: Reply) -> Option<Effect> {
        match self {
            Screen::Setup(view) => view.on_reply(reply),
            Screen::Kid(view) => view.on_reply(reply),
            Screen::Parent(view) => view.on_reply(reply),
        }
    }

    fn tick(&mut self, now: Instant) {
        match self {
            Screen::Setup(view) => view.tick(now),
            Screen::Kid(view) => view.tick(now),
            Screen::Parent(view) => view.tick(now),
        }
    }
}

/// A call waiting to be executed, addressed to one mount.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub mount_id: u64,
    pub call: Call,
}

pub struct App {
    config: LedgerConfig,
    session: SessionStore,
    router: Router,
    mount_id: u64,
    pub screen: Screen,
    pub should_quit: bool,
}

impl App {
    /// Resolve `path` through the guard and mount whatever it lands on.
    pub fn start(config: LedgerConfig, session: SessionStore, path: &str) -> Result<(Self, Vec<Dispatch>)> {
        let screen = Screen::Setup(SetupView::new(session.clone(), &config)?);
        let mut app = Self {
            router: Router::new(session.clone()),
            config,
            session,
            mount_id: 0,
            screen,
            should_quit: false,
        };
        let dispatches = app.navigate(path)?;
        Ok((app, dispatches))
    }

    pub fn page(&self) -> Page {
        self.screen.page()
    }

    pub fn mount_id(&self) -> u64 {
        self.mount_id
    }

    pub fn current_path(&self) -> &str {
        self.router.current_path().unwrap_or("/")
    }

    pub fn navigate(&mut self, path: &str) -> Result<Vec<Dispatch>> {
        let page = self.router.navigate(path)?;
        self.mount(page)
    }

    /// Go back one history entry; stays put when there is none.
    pub fn back(&mut self) -> Result<Vec<Dispatch>> {
        match self.router.back()? {
            Some(page) => self.mount(page),
            None => Ok(Vec::new()),
        }
    }

    /// Turn a view effect into work for the caller.
    pub fn apply(&mut self, effect: Option<Effect>) -> Result<Vec<Dispatch>> {
        match effect {
            None => Ok(Vec::new()),
            Some(Effect::Call(call)) => Ok(vec![Dispatch {
                mount_id: self.mount_id,
                call,
            }]),
            Some(Effect::Navigate(route)) => self.navigate(route.path()),
        }
    }

    /// Hand a reply to the page that asked for it, if it is still mounted.
    pub fn deliver(&mut self, mount_id: u64, reply: Reply) -> Result<Vec<Dispatch>> {
        if mount_id != self.mount_id {
            debug!(stale = mount_id, current = self.mount_id, "dropping reply for unmounted page");
            return Ok(Vec::new());
        }
        let effect = self.screen.on_reply(reply);
        self.apply(effect)
    }

    pub fn tick(&mut self, now: Instant) {
        self.screen.tick(now);
    }

    /// Run dispatches one at a time until the pages stop asking for more.
    pub async fn drive(&mut self, api: &dyn LedgerApi, dispatches: Vec<Dispatch>) -> Result<()> {
        let mut queue: VecDeque<Dispatch> = dispatches.into();
        while let Some(dispatch) = queue.pop_front() {
            let outcome = api.execute(&dispatch.call.request).await;
            let reply = dispatch.call.complete(outcome);
            queue.extend(self.deliver(dispatch.mount_id, reply)?);
        }
        Ok(())
    }

    fn mount(&mut self, page: Page) -> Result<Vec<Dispatch>> {
        self.mount_id += 1;
        debug!(page = page.title(), mount_id = self.mount_id, "mounting page");

        let effect = match page {
            Page::Setup => {
                self.screen = Screen::Setup(SetupView::new(self.session.clone(), &self.config)?);
                None
            }
            Page::Kid => {
                let mut view = KidView::new(self.session.clone(), &self.config)?;
                let effect = view.mount();
                self.screen = Screen::Kid(view);
                effect
            }
            Page::Parent => {
                let mut view = ParentView::new(self.session.clone(), &self.config)?;
                let effect = view.mount();
                self.screen = Screen::Parent(view);
                effect
            }
        };
        self.apply(effect)
    }
}
