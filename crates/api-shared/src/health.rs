use crate::dto::HealthRes;

/// Simple health service shared by the REST API and the runner.
#[derive(Clone, Default)]
pub struct HealthService;

impl HealthService {
    pub fn new() -> Self {
        Self
    }

    /// Static health check; needs no instance.
    pub fn check_health() -> HealthRes {
        HealthRes {
            ok: true,
            message: "LifeTag is alive".into(),
        }
    }
}
