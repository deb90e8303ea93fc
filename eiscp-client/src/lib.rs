//! Client for Onkyo/Integra receivers speaking eISCP.
//!
//! - [`discovery`]: find receivers with a UDP probe.
//! - [`session`]: one TCP connection per receiver, with a background reader
//!   publishing decoded messages.
//! - [`command`]: resolve message codes and values against a catalogue of
//!   known commands.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use eiscp_client::command::{CommandMatcher, CommandRegistry};
//! use eiscp_client::discovery::discover;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = CommandRegistry::from_toml_str(r#"
//! [[command]]
//! code = "PWR"
//! name = "system-power"
//!
//! [[command.value]]
//! code = "01"
//! name = "on"
//! "#)?;
//! let matcher = CommandMatcher::new(Arc::new(registry));
//!
//! let mut devices = discover(Duration::from_secs(5), "auto").await?;
//! if let Some(device) = devices.first_mut() {
//!     device.send("PWR", &["QSTN"]).await?;
//!     if let Some(message) = device.next_message(Duration::from_secs(3)).await? {
//!         println!("{}", matcher.resolve(&message)?);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod discovery;
pub mod error;
pub mod session;

pub use command::{CommandInfo, CommandMatcher, CommandRegistry, Resolution, ResolvedValue, ValueSpec, ValueType};
pub use discovery::{
    discover, DiscoveredDevice, Discoverer, DiscoveryConfig, DiscoveryTarget,
    DEFAULT_DISCOVERY_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT,
};
pub use error::{DiscoveryError, MatchError, RegistryError, SessionError};
pub use session::{DeviceSession, SessionConfig, NOISE_CODES};

pub use eiscp_protocol::{DeviceCategory, DeviceInfo, Message};
