//! Subcommand handlers.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;

use eiscp_client::command::{CommandInfo, CommandMatcher, CommandRegistry};
use eiscp_client::{
    DeviceInfo, DeviceSession, DiscoveredDevice, Discoverer, DiscoveryConfig, DiscoveryTarget,
    Message, SessionError,
};
use eiscp_protocol::QUERY;

use crate::Settings;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Errors raised by the front-end itself.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("no devices found")]
    NoDevicesFound,

    #[error("connection to {0} closed")]
    ConnectionClosed(SocketAddr),
}

#[derive(Serialize)]
struct DeviceRecord<'a> {
    address: SocketAddr,
    #[serde(flatten)]
    info: &'a DeviceInfo,
}

async fn scan(settings: &Settings) -> Result<Vec<DiscoveredDevice>> {
    let target = DiscoveryTarget::parse(&settings.host)?;
    info!("Discovering devices at {}", target);

    let devices = Discoverer::new(DiscoveryConfig {
        timeout: settings.discovery_timeout,
        target,
        first_only: false,
    })
    .scan()
    .await
    .map_err(|e| format!("Failed to auto-discover devices: {}", e))?;

    if devices.is_empty() {
        return Err(RemoteError::NoDevicesFound.into());
    }
    Ok(devices)
}

/// Discover and open a session to the first device that answered.
async fn connect(settings: &Settings) -> Result<DeviceSession> {
    let mut devices = scan(settings).await?;
    if devices.len() > 1 {
        warn!(
            "{} devices found, using [{}] {}",
            devices.len(),
            devices[0].info.identifier,
            devices[0].addr
        );
    }
    let device = devices.swap_remove(0);

    Ok(DeviceSession::connect_with_config(device.addr, device.info, settings.session.clone()).await?)
}

/// Wait for a message with `code`, skipping anything else the receiver
/// reports meanwhile.
async fn await_reply(
    session: &mut DeviceSession,
    code: &str,
    timeout: Duration,
) -> std::result::Result<Option<Message>, SessionError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match session.next_message(remaining).await? {
            Some(message) if message.code() == code => return Ok(Some(message)),
            Some(message) => debug!("Skipping unrelated message {}", message),
            None => return Ok(None),
        }
    }
}

pub async fn discover(settings: &Settings, json: bool) -> Result<ExitCode> {
    let devices = scan(settings).await?;

    if json {
        let records: Vec<_> = devices
            .iter()
            .map(|d| DeviceRecord {
                address: d.addr,
                info: &d.info,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for device in &devices {
            println!(
                "{}\t{}\t{}\t{}",
                device.info.identifier, device.info.model, device.addr, device.info.dest_area
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

pub async fn get(
    settings: &Settings,
    matcher: &CommandMatcher,
    code: &str,
    only_value: bool,
) -> Result<ExitCode> {
    let mut session = connect(settings).await?;
    session
        .send(code, &[QUERY])
        .await
        .map_err(|e| format!("Failed to send command: {}", e))?;

    let Some(message) = await_reply(&mut session, code, settings.response_timeout).await? else {
        debug!("No reply to {} within {:?}", code, settings.response_timeout);
        return Ok(ExitCode::FAILURE);
    };

    let resolution = matcher.resolve(&message)?;
    let value = resolution.rendered_value();
    if only_value {
        if !value.is_empty() {
            println!("{}", value);
        }
    } else {
        println!(
            "{}\t{}\t{}\t{}",
            resolution.command.code, value, resolution.command.name, resolution.command.description
        );
    }

    Ok(if value.is_empty() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

pub async fn call(
    settings: &Settings,
    matcher: &CommandMatcher,
    code: &str,
    params: &[String],
) -> Result<ExitCode> {
    let mut session = connect(settings).await?;
    session
        .send(code, params)
        .await
        .map_err(|e| format!("Failed to send command: {}", e))?;

    match await_reply(&mut session, code, settings.response_timeout).await? {
        Some(message) => {
            println!("{}", matcher.resolve(&message)?);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            debug!("No reply to {} within {:?}", code, settings.response_timeout);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Print every message until stdin closes, sending each stdin line as a
/// command.
pub async fn serve(settings: &Settings, matcher: &CommandMatcher) -> Result<ExitCode> {
    let mut session = connect(settings).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    return Ok(ExitCode::SUCCESS);
                };
                let words: Vec<&str> = line.split_whitespace().collect();
                match words.split_first() {
                    Some((code, params)) if !params.is_empty() => {
                        if let Err(e) = session.send(code, params).await {
                            error!("Failed to send command: {}", e);
                        }
                    }
                    Some(_) => warn!("Invalid syntax: commands must be in the format: CODE PARAM [PARAM ..]"),
                    None => {}
                }
            }
            message = session.recv() => {
                let Some(message) = message else {
                    return Err(RemoteError::ConnectionClosed(session.address()).into());
                };
                match matcher.resolve(&message) {
                    Ok(resolution) => {
                        println!("{}\t{}", chrono::Utc::now().timestamp_millis(), resolution)
                    }
                    Err(e) => error!("Message error: {} ({})", e, message),
                }
            }
        }
    }
}

/// Print catalogue documentation for `code`, or for every command.
pub fn help(registry: &CommandRegistry, code: Option<&str>) -> Result<ExitCode> {
    let commands = match code {
        Some(code) => vec![registry
            .get(code)
            .ok_or_else(|| format!("Could not find information on command {:?}", code))?],
        None => registry.sorted(),
    };

    for command in commands {
        print!("{}", describe(command));
    }
    Ok(ExitCode::SUCCESS)
}

fn describe(command: &CommandInfo) -> String {
    let mut out = format!(
        "{} - {} (zone: {})\n",
        command.code, command.description, command.zone
    );

    if !command.values.is_empty() {
        out.push_str("\nSubcommands:\n");
        for value in &command.values {
            let description = if value.description.is_empty() {
                &value.name
            } else {
                &value.description
            };
            let _ = writeln!(
                out,
                "  {:<10} {}",
                value.code,
                description.replace('\n', "\n    ")
            );
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use eiscp_client::command::ValueSpec;

    #[test]
    fn test_describe() {
        let mut on = ValueSpec::raw("01", "on");
        on.description = "sets System On\nwhen in standby".to_string();
        let command = CommandInfo {
            code: "PWR".to_string(),
            name: "system-power".to_string(),
            zone: "main".to_string(),
            description: "System Power Command".to_string(),
            values: vec![ValueSpec::raw("00", "standby"), on],
        };

        assert_eq!(
            describe(&command),
            "PWR - System Power Command (zone: main)\n\
             \n\
             Subcommands:\n  \
             00         standby\n  \
             01         sets System On\n    when in standby\n\
             \n"
        );
    }

    #[test]
    fn test_describe_without_values() {
        let command = CommandInfo {
            code: "NTC".to_string(),
            name: "net-usb".to_string(),
            zone: "main".to_string(),
            description: "Network/USB Operation Command".to_string(),
            values: vec![],
        };
        assert_eq!(
            describe(&command),
            "NTC - Network/USB Operation Command (zone: main)\n"
        );
    }

    #[test]
    fn test_help_unknown_code() {
        let registry = CommandRegistry::new(vec![]).unwrap();
        assert!(help(&registry, Some("XYZ")).is_err());
        assert!(help(&registry, None).is_ok());
    }

    #[tokio::test]
    async fn test_await_reply_skips_unrelated_messages() {
        use eiscp_protocol::{encode_packet, DeviceCategory};
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            for command in ["SLI10", "PWR01"] {
                let packet = encode_packet(command, DeviceCategory::Receiver);
                stream.write_all(packet.as_bytes()).await.unwrap();
            }
            stream
        });

        let info = DeviceInfo {
            model: "TX-NR686".to_string(),
            category: DeviceCategory::Receiver,
            dest_area: "XX".to_string(),
            identifier: "0009B0000000".to_string(),
            port: addr.port(),
        };
        let mut session = DeviceSession::connect(addr, info).await.unwrap();
        let _stream = server.await.unwrap();

        let reply = await_reply(&mut session, "PWR", Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.value(), "01");

        let none = await_reply(&mut session, "PWR", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(none.is_none());
    }
}
