//! The route table the registry publishes about itself.
//!
//! `build_router` mounts exactly these paths; self-registration turns them
//! into discovery records so clients can find the registry like any other
//! service.

use appreg_registry::{DiscoveryEntry, MethodEntry, UrlEntry};

pub const REGISTRY_FRIENDLY_NAME: &str = "ApplicationRegistry";
pub const DISCOVERY_FRIENDLY_NAME: &str = "ApplicationDiscovery";

/// One published route: verb, template under the controller route, method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedRoute {
    pub http_method: &'static str,
    pub template: &'static str,
    pub method_name: &'static str,
}

/// A group of routes under one controller route.
#[derive(Debug, Clone, Copy)]
pub struct Controller {
    pub friendly_name: &'static str,
    pub controller_name: &'static str,
    pub controller_route: &'static str,
    pub routes: &'static [PublishedRoute],
}

const fn route(http_method: &'static str, template: &'static str, method_name: &'static str) -> PublishedRoute {
    PublishedRoute { http_method, template, method_name }
}

pub const REGISTRY_CONTROLLER: Controller = Controller {
    friendly_name: REGISTRY_FRIENDLY_NAME,
    controller_name: "Registry",
    controller_route: "api/v1/registry",
    routes: &[
        route("POST", "", "Register"),
        route("POST", "register", "Register"),
        route("POST", "verify", "VerifyApplicationModel"),
        route("GET", "{instance_id}", "GetApplicationInstanceHierarchy"),
        route("POST", "active", "IsActive"),
        route("PUT", "instance-active-flag", "SetInstanceActiveFlag"),
        route("GET", "whois/{instance_id}", "WhoIs"),
        route("GET", "location/{instance_id}", "GetInstanceLocation"),
        route("PUT", "heartbeat", "IncrementHeartbeat"),
    ],
};

pub const DISCOVERY_CONTROLLER: Controller = Controller {
    friendly_name: DISCOVERY_FRIENDLY_NAME,
    controller_name: "Discovery",
    controller_route: "api/v1/discovery",
    routes: &[
        route("POST", "", "AddDiscoveryRecords"),
        route("GET", "urls/{friendly_name}", "GetURLsForFriendlyName"),
        route("GET", "routes/{friendly_name}", "GetRoutes"),
        route("GET", "health", "GetAllApplicationHealthStatus"),
        route("GET", "health/{friendly_name}", "GetApplicationHealthStatusByFriendlyName"),
        route("GET", "health-latest", "GetApplicationHealthStatusByLatest"),
    ],
};

pub const CONTROLLERS: [Controller; 2] = [REGISTRY_CONTROLLER, DISCOVERY_CONTROLLER];

impl Controller {
    /// Discovery record for this controller served on `urls`. Instance and
    /// version ids are filled in at registration.
    pub fn discovery_entry(&self, urls: &[UrlEntry]) -> DiscoveryEntry {
        DiscoveryEntry {
            instance_id: 0,
            version_id: 0,
            friendly_name: self.friendly_name.to_string(),
            controller_name: self.controller_name.to_string(),
            controller_route: self.controller_route.to_string(),
            urls: urls.to_vec(),
            methods: self
                .routes
                .iter()
                .map(|r| MethodEntry {
                    http_method: r.http_method.to_string(),
                    method_name: r.method_name.to_string(),
                    template: r.template.to_string(),
                })
                .collect(),
        }
    }

    /// Absolute path of one of this controller's routes.
    pub fn path(&self, route: &PublishedRoute) -> String {
        if route.template.is_empty() {
            format!("/{}", self.controller_route)
        } else {
            format!("/{}/{}", self.controller_route, route.template)
        }
    }
}

/// Discovery records for every controller.
pub fn self_discovery_entries(urls: &[UrlEntry]) -> Vec<DiscoveryEntry> {
    CONTROLLERS.iter().map(|c| c.discovery_entry(urls)).collect()
}
