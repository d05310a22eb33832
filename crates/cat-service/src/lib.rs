//! CAT Service
//!
//! A long-lived pipeline that keeps one transceiver's status current and
//! carries commands to it:
//!
//! ```text
//!            +----------+  matched lines  +-----------+  snapshots  +---------+
//! serial --> | listener | --------------> | processor | ----------> | mailbox | --> consumers
//!            +----------+                 +-----------+             +---------+
//!
//! enqueue_command --> send queue --> +--------+ --> serial
//!                                    | sender |
//!                                    +--------+
//! ```
//!
//! The three workers are tokio tasks tied to one cancellation token per run.
//! [`CatService`] owns the lifecycle; configuration comes from a
//! [`ConfigProvider`] and every log event goes to the [`tracing::Dispatch`]
//! handed to the builder.
//!
//! # Example
//!
//! ```rust,no_run
//! use cat_service::{CatService, FileConfigProvider};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = FileConfigProvider::load("rig.json")?;
//! let service = CatService::builder()
//!     .config_provider(provider)
//!     .with_current_logger()
//!     .build();
//!
//! service.initialize()?;
//! service.start().await?;
//!
//! let status = service.status_channel()?;
//! service.enqueue_command("READ_VFOA", &[])?;
//! if let Some(snapshot) = status.recv().await {
//!     println!("{:?}", snapshot.get("VFOA"));
//! }
//!
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
mod listener;
pub mod mailbox;
mod processor;
mod sender;
pub mod serial;
pub mod service;

pub use config::{
    AppConfig, CatConfig, ConfigError, ConfigProvider, ConfigValidator, FileConfigProvider,
    RequiredConfigs, RigConfig,
};
pub use error::ServiceError;
pub use mailbox::{PublishOutcome, StatusMailbox, StatusReceiver};
pub use serial::{LineTransport, SerialConnector};
pub use service::{CatService, CatServiceBuilder, ServiceState};

pub use cat_protocol::{OutboundCommand, StatusSnapshot};
