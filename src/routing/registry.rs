//! Registration lookup and dispatch.
//!
//! # Responsibilities
//! - Keep one [`ProxyHandler`] per registered group/version
//! - Apply registration adds, updates and removals
//! - Route each request to its handler, or to the local delegate
//!
//! # Design Decisions
//! - The map is swapped atomically; readers never block on writers
//! - A handler survives updates to its registration, only its snapshot changes
//! - In-flight requests keep the handler they started with

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tower::ServiceExt;

use crate::apiservice::{ApiService, GroupVersion};
use crate::proxy::{ProxyHandler, ProxyOptions};
use crate::routing::matcher::match_group_version;

#[derive(Clone)]
struct Registration {
    name: String,
    handler: Arc<ProxyHandler>,
}

/// All registered group/versions.
pub struct ApiServiceRegistry {
    options: ProxyOptions,
    handlers: ArcSwap<HashMap<GroupVersion, Registration>>,
}

impl ApiServiceRegistry {
    pub fn new(options: ProxyOptions) -> Self {
        Self {
            options,
            handlers: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Register `api_service`, or refresh its snapshot if already known.
    pub fn add_api_service(&self, api_service: &ApiService) {
        let gv = api_service.group_version();
        let mut created = None;

        self.handlers.rcu(|current| {
            let mut next = HashMap::clone(current);
            // A registration that moved to another group/version leaves its old slot.
            next.retain(|key, reg| reg.name != api_service.name || *key == gv);

            let handler = match next.get(&gv) {
                Some(existing) => existing.handler.clone(),
                None => created
                    .get_or_insert_with(|| Arc::new(ProxyHandler::new(&self.options)))
                    .clone(),
            };
            next.insert(
                gv.clone(),
                Registration {
                    name: api_service.name.clone(),
                    handler,
                },
            );
            next
        });

        if let Some(handler) = self.handler_for_group_version(&gv) {
            handler.update_api_service(api_service);
        }
        tracing::info!(api_service = %api_service.name, group_version = %gv, "Registered API service");
    }

    /// Forget the registration called `name`. Returns whether it existed.
    pub fn remove_api_service(&self, name: &str) -> bool {
        let mut removed = Vec::new();
        self.handlers.rcu(|current| {
            removed.clear();
            let mut next = HashMap::clone(current);
            next.retain(|gv, reg| {
                let keep = reg.name != name;
                if !keep {
                    removed.push((gv.clone(), reg.handler.clone()));
                }
                keep
            });
            next
        });

        for (gv, handler) in &removed {
            handler.remove_api_service();
            tracing::info!(api_service = %name, group_version = %gv, "Removed API service");
        }
        !removed.is_empty()
    }

    /// Reconcile with the full set of registrations: add or refresh every
    /// entry in `api_services` and remove everything else.
    pub fn sync(&self, api_services: &[ApiService]) {
        let wanted: HashSet<&str> = api_services.iter().map(|s| s.name.as_str()).collect();
        let stale: Vec<String> = self
            .handlers
            .load()
            .values()
            .filter(|reg| !wanted.contains(reg.name.as_str()))
            .map(|reg| reg.name.clone())
            .collect();

        for name in stale {
            self.remove_api_service(&name);
        }
        for api_service in api_services {
            self.add_api_service(api_service);
        }
    }

    pub fn handler_for_group_version(&self, gv: &GroupVersion) -> Option<Arc<ProxyHandler>> {
        self.handlers.load().get(gv).map(|reg| reg.handler.clone())
    }

    /// Handler for a request path, if it addresses a registered group/version.
    pub fn handler_for(&self, path: &str) -> Option<Arc<ProxyHandler>> {
        match_group_version(path).and_then(|gv| self.handler_for_group_version(&gv))
    }

    /// Names of all registrations, sorted.
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.load().values().map(|r| r.name.clone()).collect();
        names.sort();
        names
    }

    pub async fn dispatch(&self, req: Request<Body>) -> Response {
        match self.handler_for(req.uri().path()) {
            Some(handler) => handler.serve(req).await,
            None => match self.options.local_delegate.clone().oneshot(req).await {
                Ok(response) => response,
                Err(never) => match never {},
            },
        }
    }
}
