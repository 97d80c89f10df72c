use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use pretty_assertions::assert_eq;

const TARGET: &str = "AA:BB:CC:DD:EE:FF";
const CONTROL_TOPIC: &str = "AA:BB:CC:DD:EE:FF/control";
const FROM_SERVER_TOPIC: &str = "AA:BB:CC:DD:EE:FF/from_server";

static CONFIG_COUNTER: AtomicUsize = AtomicUsize::new(0);

struct FakeTerminalClient {
    lines: Vec<String>,
    interrupted: bool,
}

impl FakeTerminalClient {
    fn with_lines<const N: usize>(lines: [&str; N]) -> Self {
        Self {
            lines: lines.iter().map(ToString::to_string).collect(),
            interrupted: false,
        }
    }

    /// A console that never produces a line, with Ctrl+C already pressed.
    fn interrupted() -> Self {
        Self {
            lines: Vec::new(),
            interrupted: true,
        }
    }
}

impl mqrelay::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }

    fn console_lines(&self) -> mqrelay::ConsoleLines {
        if self.interrupted {
            return Box::pin(tokio_stream::pending::<std::io::Result<String>>());
        }
        mqrelay::scripted_console_lines(self.lines.clone())
    }

    fn interrupted(&self) -> mqrelay::Interrupt {
        if self.interrupted {
            Box::pin(std::future::ready(Ok(())))
        } else {
            Box::pin(std::future::pending())
        }
    }
}

struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    fn write(contents: &str) -> std::io::Result<Self> {
        let path = Self::unused_path();
        std::fs::write(&path, contents)?;
        Ok(Self { path })
    }

    fn unused_path() -> PathBuf {
        let index = CONFIG_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "mqrelay-test-{}-{index}.json",
            std::process::id()
        ))
    }
}

impl Drop for ConfigFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

struct RelayRun {
    stdout: String,
    publish_log: mqrelay::PublishLog,
}

impl RelayRun {
    fn payloads(&self, topic: &str) -> Vec<String> {
        self.publish_log
            .payloads_for(topic)
            .into_iter()
            .map(|payload| String::from_utf8_lossy(&payload).into_owned())
            .collect()
    }
}

async fn run_relay(
    config: &ConfigFile,
    fake: mqrelay::FakeArgs,
    terminal: &FakeTerminalClient,
) -> anyhow::Result<RelayRun> {
    run_relay_with_args(mqrelay::RunArgs::new(&config.path), fake, terminal).await
}

async fn run_relay_with_args(
    run_args: mqrelay::RunArgs,
    fake: mqrelay::FakeArgs,
    terminal: &FakeTerminalClient,
) -> anyhow::Result<RelayRun> {
    let publish_log = fake.publish_log().clone();
    let args = mqrelay::Args::new(mqrelay::Command::Run(run_args)).with_fake(fake);
    let stdout = run_with_parsed_args(args, terminal).await?;
    Ok(RelayRun {
        stdout,
        publish_log,
    })
}

async fn run_with_parsed_args(
    args: mqrelay::Args,
    terminal: &FakeTerminalClient,
) -> anyhow::Result<String> {
    let mut output = Vec::new();
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let connector = match maybe_fake_args {
        Some(fake_args) => mqrelay::fake_broker_connector(fake_args),
        None => mqrelay::real_broker_connector(mqrelay::BrokerSettings::default()),
    };
    mqrelay::run_with_clients(command, &mut output, terminal, connector).await?;
    Ok(String::from_utf8(output)?)
}

async fn run_with_argv<const N: usize>(argv: [&str; N]) -> anyhow::Result<String> {
    let parsed_args = mqrelay::Args::try_parse_from(argv)?;
    run_with_parsed_args(parsed_args, &FakeTerminalClient::with_lines([])).await
}

fn activate_config() -> std::io::Result<ConfigFile> {
    ConfigFile::write(&format!(r#"{{"target":"{TARGET}","control":"activate"}}"#))
}

#[tokio::test]
async fn startup_publishes_configured_control_once() -> anyhow::Result<()> {
    let config = activate_config()?;

    let run = run_relay(
        &config,
        mqrelay::FakeArgs::builder().build(),
        &FakeTerminalClient::with_lines([]),
    )
    .await?;

    assert_eq!(vec!["activate".to_string()], run.payloads(CONTROL_TOPIC));
    assert!(run.stdout.starts_with("Relay session:"));
    assert!(run.stdout.contains("→ control activate (startup)"));
    assert!(
        run.stdout
            .trim_end()
            .ends_with("Session ended: console input closed")
    );
    Ok(())
}

#[tokio::test]
async fn reconnect_notices_resend_control_inside_throttle() -> anyhow::Result<()> {
    let config = activate_config()?;
    let fake = mqrelay::FakeArgs::builder()
        .inbound("status|MQTT Reconnected;status|mqtt reconnected")?
        .build();

    let run = run_relay(&config, fake, &FakeTerminalClient::with_lines([])).await?;

    assert_eq!(
        vec!["activate".to_string(), "activate".to_string()],
        run.payloads(CONTROL_TOPIC)
    );
    assert!(run.stdout.contains("→ control activate (reconnect)"));
    Ok(())
}

#[tokio::test]
async fn custom_reconnect_markers_replace_defaults() -> anyhow::Result<()> {
    let config = activate_config()?;
    let fake = mqrelay::FakeArgs::builder()
        .inbound("status|mqtt reconnected;status|LINK UP")?
        .build();
    let run_args = mqrelay::RunArgs::new(&config.path).with_reconnect_markers(["link up"]);

    let run = run_relay_with_args(run_args, fake, &FakeTerminalClient::with_lines([])).await?;

    assert_eq!(
        vec!["activate".to_string(), "activate".to_string()],
        run.payloads(CONTROL_TOPIC)
    );
    Ok(())
}

#[tokio::test]
async fn headless_run_keeps_running_without_console() -> anyhow::Result<()> {
    let config = activate_config()?;
    let run_args = mqrelay::RunArgs::new(&config.path)
        .headless()
        .with_poll_interval(std::time::Duration::from_millis(10));

    let result = tokio::time::timeout(
        std::time::Duration::from_millis(200),
        run_relay_with_args(
            run_args,
            mqrelay::FakeArgs::builder().build(),
            &FakeTerminalClient::with_lines(["deactivate"]),
        ),
    )
    .await;

    assert!(result.is_err(), "headless relay should keep running");
    Ok(())
}

#[tokio::test]
async fn interrupt_ends_session_while_console_is_idle() -> anyhow::Result<()> {
    let config = activate_config()?;

    let run = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        run_relay(
            &config,
            mqrelay::FakeArgs::builder().build(),
            &FakeTerminalClient::interrupted(),
        ),
    )
    .await??;

    assert_eq!(vec!["activate".to_string()], run.payloads(CONTROL_TOPIC));
    assert!(run.stdout.trim_end().ends_with("Session ended: interrupted"));
    Ok(())
}

#[tokio::test]
async fn inbound_flood_yields_to_operator_input() -> anyhow::Result<()> {
    let config = ConfigFile::write(&format!(r#"{{"target":"{TARGET}"}}"#))?;
    let flood = 200;
    let fixtures = (0..flood)
        .map(|index| format!("to_server|flood {index}"))
        .collect::<Vec<_>>()
        .join(";");
    let fake = mqrelay::FakeArgs::builder().inbound(&fixtures)?.build();

    let run = run_relay(&config, fake, &FakeTerminalClient::with_lines(["quit"])).await?;

    let relayed = run.stdout.matches("← to_server flood").count();
    assert!(relayed > 0);
    assert!(relayed < flood, "quit waited for all {relayed} inbound messages");
    assert!(
        run.stdout
            .trim_end()
            .ends_with("Session ended: operator quit")
    );
    Ok(())
}

#[tokio::test]
async fn console_frame_publishes_wire_bytes() -> anyhow::Result<()> {
    let config = activate_config()?;

    let run = run_relay(
        &config,
        mqrelay::FakeArgs::builder().build(),
        &FakeTerminalClient::with_lines(["frame 2 5 hello"]),
    )
    .await?;

    assert_eq!(
        vec![b"c\x02\x05hellov".to_vec()],
        run.publish_log.payloads_for(FROM_SERVER_TOPIC)
    );
    assert!(run.stdout.contains("[63 02 05 68 65 6C 6C 6F 76]"));
    Ok(())
}

#[tokio::test]
async fn console_usage_error_publishes_nothing() -> anyhow::Result<()> {
    let config = activate_config()?;

    let run = run_relay(
        &config,
        mqrelay::FakeArgs::builder().build(),
        &FakeTerminalClient::with_lines(["frame abc 1 data", "frame 1"]),
    )
    .await?;

    assert!(run.payloads(FROM_SERVER_TOPIC).is_empty());
    assert!(run.stdout.contains("! frame cmd must be numeric"));
    assert!(run.stdout.contains("! usage: frame <cmd> <subtype> <data>"));
    Ok(())
}

#[tokio::test]
async fn operator_commands_and_quit() -> anyhow::Result<()> {
    let config = ConfigFile::write(&format!(r#"{{"target":"{TARGET}"}}"#))?;

    let run = run_relay(
        &config,
        mqrelay::FakeArgs::builder().build(),
        &FakeTerminalClient::with_lines(["deactivate", "led on", "quit", "activate"]),
    )
    .await?;

    assert_eq!(vec!["deactivate".to_string()], run.payloads(CONTROL_TOPIC));
    assert_eq!(vec!["led on".to_string()], run.payloads(FROM_SERVER_TOPIC));
    assert!(
        run.stdout
            .trim_end()
            .ends_with("Session ended: operator quit")
    );
    Ok(())
}

#[tokio::test]
async fn automation_message_is_sent_once() -> anyhow::Result<()> {
    let config = ConfigFile::write(&format!(
        r#"{{"target":"{TARGET}","send_message":"led on"}}"#
    ))?;

    let run = run_relay(
        &config,
        mqrelay::FakeArgs::builder().build(),
        &FakeTerminalClient::with_lines([]),
    )
    .await?;

    assert_eq!(vec!["led on".to_string()], run.payloads(FROM_SERVER_TOPIC));
    assert!(run.stdout.contains(r#"→ from_server "led on" (automation)"#));
    Ok(())
}

#[tokio::test]
async fn automation_message_is_held_while_device_inactive() -> anyhow::Result<()> {
    let config = ConfigFile::write(&format!(
        r#"{{"target":"{TARGET}","send_message":"led on"}}"#
    ))?;
    let fake = mqrelay::FakeArgs::builder()
        .inbound("status|esp pasif")?
        .build();

    let run = run_relay(&config, fake, &FakeTerminalClient::with_lines([])).await?;

    assert!(run.payloads(FROM_SERVER_TOPIC).is_empty());
    assert!(run.stdout.contains("device is inactive"));
    Ok(())
}

#[tokio::test]
async fn inbound_frames_are_decoded() -> anyhow::Result<()> {
    let config = activate_config()?;
    let fake = mqrelay::FakeArgs::builder()
        .inbound("to_server|hex:630205686976;to_server|plain text")?
        .build();

    let run = run_relay(&config, fake, &FakeTerminalClient::with_lines([])).await?;

    assert!(
        run.stdout
            .contains(r#"← to_server frame cmd=0x02 subtype=0x05 data="hi""#)
    );
    assert!(run.stdout.contains("← to_server plain text"));
    Ok(())
}

#[tokio::test]
async fn missing_config_reports_example_and_skips_broker() -> anyhow::Result<()> {
    let fake = mqrelay::FakeArgs::builder().build();
    let publish_log = fake.publish_log().clone();
    let run_args = mqrelay::RunArgs::new(ConfigFile::unused_path());
    let args = mqrelay::Args::new(mqrelay::Command::Run(run_args)).with_fake(fake);

    let error = run_with_parsed_args(args, &FakeTerminalClient::with_lines([]))
        .await
        .expect_err("a missing configuration file should stop the relay");

    let message = format!("{error:#}");
    assert!(message.contains("was not found"), "{message}");
    assert!(message.contains(r#"{"target":"#), "{message}");
    assert!(publish_log.messages().is_empty());
    Ok(())
}

#[tokio::test]
async fn blank_target_is_rejected_at_startup() -> anyhow::Result<()> {
    let config = ConfigFile::write(r#"{"target":"   ","control":"activate"}"#)?;
    let fake = mqrelay::FakeArgs::builder().build();
    let publish_log = fake.publish_log().clone();

    let error = run_relay(&config, fake, &FakeTerminalClient::with_lines([]))
        .await
        .err()
        .expect("a blank target should stop the relay");

    let message = format!("{error:#}");
    assert!(message.contains("empty `target`"), "{message}");
    assert!(message.contains("example contents"), "{message}");
    assert!(publish_log.messages().is_empty());
    Ok(())
}

#[tokio::test]
async fn encode_masks_fields_to_one_byte() -> anyhow::Result<()> {
    let stdout = run_with_argv(["mqrelay", "encode", "0x102", "5", "hi"]).await?;
    assert_eq!("63 02 05 68 69 76", stdout.trim_end());
    Ok(())
}

#[tokio::test]
async fn decode_prints_frame_fields() -> anyhow::Result<()> {
    let stdout = run_with_argv(["mqrelay", "decode", "63 02 05 68 69 76"]).await?;

    assert!(stdout.starts_with("Frame:"));
    assert!(stdout.contains("0x02"));
    assert!(stdout.contains("0x05"));
    assert!(stdout.contains(r#""hi""#));
    Ok(())
}

#[tokio::test]
async fn decode_reports_non_frames() -> anyhow::Result<()> {
    let stdout = run_with_argv(["mqrelay", "decode", "00 01 02"]).await?;
    assert_eq!("not a frame", stdout.trim_end());
    Ok(())
}

#[tokio::test]
async fn decode_rejects_invalid_hex() {
    let error = run_with_argv(["mqrelay", "decode", "zz"])
        .await
        .expect_err("invalid hex should fail");
    assert!(format!("{error:#}").contains("`zz` is not valid hex"));
}
