//! Funnel Web
//!
//! Renders run statistics into the interactive dashboard and serves it,
//! together with the run artifacts and the trace-viewer gateway.

pub mod error;
pub mod gateway;
pub mod port;
pub mod server;
pub mod static_files;
pub mod template;
pub mod view;

pub use error::{Result, WebError};
pub use gateway::{TraceGateway, TraceOpened};
pub use server::{DashboardServer, ServerConfig};
pub use template::{write_dashboard, DashboardTemplate, HtmlTemplate};
pub use view::{build_view, DashboardView, RenderOptions, ARTIFACT_MOUNT};
