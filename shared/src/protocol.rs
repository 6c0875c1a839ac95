/// Route paths served by the navigator daemon
pub const HEALTH_PATH: &str = "/api/health";
pub const SERVICES_PATH: &str = "/api/services";
pub const SERVICE_PATH: &str = "/api/services/:id";
pub const DIGEST_PATH: &str = "/api/digest";
pub const DISCOVERY_RUN_PATH: &str = "/api/discovery/run";
pub const DISCOVERY_OBSERVATIONS_PATH: &str = "/api/discovery/observations";
pub const DISCOVERY_STATUS_PATH: &str = "/api/discovery/status";
