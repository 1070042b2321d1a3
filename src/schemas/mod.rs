use serde::Serialize;

pub(crate) mod task;

pub(crate) use task::{
    EngineStatusResponse, ServiceStatusResponse, TaskCreatedResponse, TaskResponse,
};

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) service: String,
    pub(crate) status: &'static str,
    pub(crate) available_engines: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct RootResponse {
    pub(crate) message: String,
    pub(crate) version: String,
    pub(crate) status_url: String,
}
