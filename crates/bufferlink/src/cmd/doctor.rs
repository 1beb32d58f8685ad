use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use bufferlink_channel::{ChannelConfig, ClientChannel, Dispatch, HostChannel};
use bufferlink_transport::LocalSocket;
use bufferlink_wire::{Message, PoolId};
use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }

    fn from_probe(name: &'static str, probe: Result<String, String>) -> Self {
        match probe {
            Ok(detail) => Self::new(name, CheckStatus::Pass, detail),
            Err(detail) => Self::new(name, CheckStatus::Fail, detail),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = vec![
        CheckResult::from_probe("socket_pair", socket_pair_probe()),
        CheckResult::from_probe("descriptor_passing", descriptor_passing_probe()),
        peer_credentials_check(),
        CheckResult::from_probe("channel_round_trip", channel_round_trip_probe()),
        timeouts_check(),
    ];

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => {
            let mut table = table(["CHECK", "STATUS", "DETAIL"]);
            for c in &output.checks {
                table.add_row(vec![
                    c.name.to_string(),
                    status_text(c.status).to_string(),
                    c.detail.clone(),
                ]);
            }
            println!("{table}");
            println!("Result: {}", output.overall);
        }
        OutputFormat::Pretty => {
            println!("bufferlink doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<20} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => println!("{}", output.overall),
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn socket_pair_probe() -> Result<String, String> {
    let (local, remote) = LocalSocket::pair().map_err(|err| err.to_string())?;
    let remote = LocalSocket::from_fd(remote);
    local.send_all(b"ping").map_err(|err| err.to_string())?;

    remote
        .set_read_timeout(Some(PROBE_TIMEOUT))
        .map_err(|err| err.to_string())?;
    let mut buf = [0u8; 4];
    let n = remote
        .recv(&mut buf, bufferlink_transport::IoMode::Blocking)
        .map_err(|err| format!("recv failed: {err}"))?;
    if &buf[..n] != b"ping" {
        return Err(format!("read back {n} unexpected bytes"));
    }
    Ok("stream socket pair created and exchanged bytes".to_string())
}

fn descriptor_passing_probe() -> Result<String, String> {
    let (sender, remote) = LocalSocket::pair().map_err(|err| err.to_string())?;
    let receiver = LocalSocket::from_fd(remote);
    receiver
        .set_read_timeout(Some(PROBE_TIMEOUT))
        .map_err(|err| err.to_string())?;

    let (mut probe_local, probe_remote) = UnixStream::pair().map_err(|err| err.to_string())?;
    sender
        .send_fd(probe_remote.as_fd())
        .map_err(|err| format!("send failed: {err}"))?;
    drop(probe_remote);

    let received = receiver
        .recv_fd()
        .map_err(|err| format!("receive failed: {err}"))?;
    let mut received = UnixStream::from(received);
    received
        .write_all(b"fd")
        .map_err(|err| format!("write through descriptor failed: {err}"))?;

    probe_local
        .set_read_timeout(Some(PROBE_TIMEOUT))
        .map_err(|err| err.to_string())?;
    let mut buf = [0u8; 2];
    probe_local
        .read_exact(&mut buf)
        .map_err(|err| format!("read through descriptor failed: {err}"))?;
    Ok("SCM_RIGHTS descriptor arrived and is usable".to_string())
}

fn peer_credentials_check() -> CheckResult {
    const NAME: &str = "peer_credentials";
    let (local, _remote) = match LocalSocket::pair() {
        Ok(pair) => pair,
        Err(err) => return CheckResult::new(NAME, CheckStatus::Fail, err.to_string()),
    };

    match local.peer_credentials() {
        Some((uid, gid, pid)) if pid == std::process::id() => CheckResult::new(
            NAME,
            CheckStatus::Pass,
            format!("uid={uid} gid={gid} pid={pid}"),
        ),
        Some((_, _, pid)) => CheckResult::new(
            NAME,
            CheckStatus::Fail,
            format!("peer pid {pid} is not this process"),
        ),
        None => CheckResult::new(
            NAME,
            CheckStatus::Skip,
            "peer credentials not exposed on this platform",
        ),
    }
}

/// Full host/client exchange: a request answered by a pre-queued reply,
/// then the host reading the request back.
fn channel_round_trip_probe() -> Result<String, String> {
    let config = ChannelConfig::with_timeout(Some(PROBE_TIMEOUT));
    let mut host = HostChannel::initialize(config);
    let client_fd = host
        .release_client_fd(true)
        .map_err(|err| err.to_string())?;
    let client = ClientChannel::initialize(client_fd, config);

    let pool_id = PoolId(1);
    host.send_message(&Message::PoolConstructionReply { pool_id });
    let reply = client
        .send_and_receive_message(&Message::PoolConstruction)
        .map_err(|err| format!("request failed: {err}"))?;
    if reply != (Message::PoolConstructionReply { pool_id }) {
        return Err(format!("unexpected reply {reply}"));
    }

    let mut seen = None;
    let outcome = host.dispatch(&mut |_: &HostChannel, message: Message| {
        seen = Some(message);
        Dispatch::Continue
    });
    match (outcome, seen) {
        (Dispatch::Continue, Some(Message::PoolConstruction)) => {
            Ok("request, reply and host dispatch agree".to_string())
        }
        (_, other) => Err(format!("host read {other:?}")),
    }
}

fn timeouts_check() -> CheckResult {
    let config = ChannelConfig::from_env();
    let show = |timeout: Option<Duration>| match timeout {
        Some(duration) => format!("{}ms", duration.as_millis()),
        None => "none".to_string(),
    };
    CheckResult::new(
        "timeouts",
        CheckStatus::Info,
        format!(
            "reply={} descriptor={} write={}",
            show(config.reply_timeout),
            show(config.descriptor_timeout),
            show(config.write_timeout)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_pass_on_a_unix_host() {
        assert!(socket_pair_probe().is_ok());
        assert!(descriptor_passing_probe().is_ok());
        assert!(channel_round_trip_probe().is_ok());
        assert_ne!(peer_credentials_check().status, CheckStatus::Fail);
    }

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput {
            checks: vec![CheckResult::new("x", CheckStatus::Pass, "ok")],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }
}
