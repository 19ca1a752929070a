use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{Parser, Subcommand};
use pubsub_jobs::config::{AppConfig, CliConfig, FileConfig};
use pubsub_jobs::metrics;
use pubsub_jobs::pubsub::{
    AckHandle, Client, Message, MessageCodec, OutgoingMessage, Payload, PayloadEncoding,
    PullOptions, RequestsLoggingLevel,
};
use std::fmt::Debug;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CREDENTIALS_ENV_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Project that owns the topics and subscriptions.
    #[clap(long)]
    pub project_id: Option<String>,

    /// Base API URL, e.g. http://localhost:8085/v1 for the emulator.
    #[clap(long)]
    pub endpoint: Option<String>,

    /// Fixed bearer token.
    #[clap(long)]
    pub access_token: Option<String>,

    /// Shell command printing a bearer token, e.g. "gcloud auth print-access-token".
    #[clap(long)]
    pub token_command: Option<String>,

    /// Service account JSON key. Defaults to $GOOGLE_APPLICATION_CREDENTIALS.
    #[clap(long)]
    pub credentials_file: Option<PathBuf>,

    /// Get tokens from the GCE metadata server.
    #[clap(long)]
    pub metadata_server: bool,

    /// How message payloads are presented and encoded.
    #[clap(long, default_value = "text-utf8")]
    pub payload_encoding: PayloadEncoding,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Timeout in seconds for each API request.
    #[clap(long, default_value_t = 60)]
    pub request_timeout_sec: u64,

    /// Ack deadline requested on each renewal of a long-running job, in milliseconds.
    #[clap(long, default_value_t = 60_000)]
    pub extend_by_ms: u64,

    /// Interval between renewals of a long-running job, in milliseconds.
    #[clap(long, default_value_t = 30_000)]
    pub period_ms: u64,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Pulls messages and prints them as JSON lines.
    Pull {
        subscription: String,

        #[clap(long, default_value_t = 1)]
        max_messages: u32,

        /// Wait for messages instead of returning immediately.
        #[clap(long)]
        wait: bool,

        /// Acknowledge the pulled messages.
        #[clap(long)]
        ack: bool,
    },

    /// Acknowledges the given ack ids.
    Ack {
        subscription: String,
        #[clap(required = true)]
        ack_ids: Vec<String>,
    },

    /// Sets the ack deadline of the given ack ids. A deadline of 0 nacks them.
    Modack {
        subscription: String,

        #[clap(long)]
        deadline_sec: u64,

        #[clap(required = true)]
        ack_ids: Vec<String>,
    },

    /// Publishes one message per argument and prints the message ids.
    Publish {
        topic: String,

        #[clap(required = true)]
        messages: Vec<String>,

        /// Attribute added to every message, as key=value. Can be repeated.
        #[clap(long = "attribute", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,
    },

    /// Pulls one long-running job at a time and runs a command for it while
    /// its deadline is renewed. The payload is written to the command's stdin.
    Work {
        subscription: String,

        /// Command to run, split with shell quoting rules.
        command: String,

        /// Keep pulling until the subscription is empty instead of handling one job.
        #[clap(long)]
        drain: bool,

        /// Nack failed jobs for immediate redelivery instead of waiting for the deadline to lapse.
        #[clap(long)]
        nack_on_failure: bool,

        /// Print the metrics exposition to stderr before exiting.
        #[clap(long)]
        print_metrics: bool,
    },
}

fn parse_attribute(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("Attribute must be key=value: {}", s),
    }
}

impl CliArgs {
    fn cli_config(&self) -> CliConfig {
        let credentials_file = self.credentials_file.clone().or_else(|| {
            let no_other_source = self.access_token.is_none()
                && self.token_command.is_none()
                && !self.metadata_server;
            if no_other_source {
                std::env::var_os(CREDENTIALS_ENV_VAR).map(PathBuf::from)
            } else {
                None
            }
        });

        CliConfig {
            project_id: self.project_id.clone(),
            endpoint: self.endpoint.clone(),
            access_token: self.access_token.clone(),
            token_command: self.token_command.clone(),
            credentials_file,
            metadata_server: self.metadata_server,
            payload_encoding: self.payload_encoding,
            logging_level: self.logging_level,
            request_timeout_sec: self.request_timeout_sec,
            extend_by_ms: self.extend_by_ms,
            period_ms: self.period_ms,
        }
    }
}

fn message_json(message: &Message) -> serde_json::Value {
    let (data, encoding) = match &message.payload {
        Payload::Text(text) => (text.clone(), "text"),
        Payload::Bytes(bytes) => (STANDARD.encode(bytes), "base64"),
    };
    serde_json::json!({
        "ackId": message.ack_handle,
        "messageId": message.message_id,
        "publishTime": message.publish_time.map(|t| t.to_rfc3339()),
        "attributes": message.attributes,
        "data": data,
        "dataEncoding": encoding,
    })
}

#[derive(Debug)]
enum JobOutcome {
    Succeeded,
    Failed(String),
    Interrupted,
}

/// Runs `argv` for one message, feeding it the payload bytes on stdin.
///
/// The payload is written from its own task so a command that never reads
/// stdin cannot stall the wait on `interrupt`, which kills the child.
async fn run_job(
    argv: &[String],
    message: &Message,
    codec: MessageCodec,
    interrupt: impl Future<Output = ()>,
) -> Result<JobOutcome> {
    let (program, args) = argv.split_first().context("Empty work command")?;
    let payload = codec
        .to_bytes(&message.payload)
        .context("Failed to convert payload to bytes")?;

    let mut command = Command::new(program);
    command
        .args(args)
        .env("PUBSUB_ACK_ID", message.ack_handle.as_str())
        .env(
            "PUBSUB_MESSAGE_ID",
            message.message_id.as_deref().unwrap_or_default(),
        )
        .stdin(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &message.attributes {
        command.env(format!("PUBSUB_ATTR_{}", key.to_uppercase()), value);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to start {:?}", program))?;

    let writer = child.stdin.take().map(|mut stdin| {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                warn!("Failed to write payload to job stdin: {}", e);
            }
        })
    });

    let outcome = tokio::select! {
        status = child.wait() => {
            let status = status.context("Failed to wait for job command")?;
            if status.success() {
                JobOutcome::Succeeded
            } else {
                JobOutcome::Failed(format!("command exited with {}", status))
            }
        }
        _ = interrupt => {
            warn!("Interrupted, stopping job command");
            let _ = child.kill().await;
            JobOutcome::Interrupted
        }
    };

    if let Some(writer) = writer {
        writer.abort();
    }
    Ok(outcome)
}

async fn work(
    client: &Client,
    config: &AppConfig,
    subscription: &str,
    command: &str,
    drain: bool,
    nack_on_failure: bool,
) -> Result<()> {
    let argv = shlex::split(command)
        .with_context(|| format!("Could not parse work command: {}", command))?;
    if argv.is_empty() {
        bail!("Work command must not be empty");
    }

    let mut handled = 0usize;
    loop {
        let Some(message) = client
            .start_long_running_job(subscription, config.long_running)
            .await?
        else {
            info!("No messages available on {}", subscription);
            break;
        };
        let ack_handle: AckHandle = message.ack_handle.clone();
        info!(
            "Running job for message {}",
            message.message_id.as_deref().unwrap_or("<unknown>")
        );

        let interrupt = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        match run_job(&argv, &message, client.codec(), interrupt).await {
            Ok(JobOutcome::Succeeded) => {
                client
                    .acknowledge_long_running_job(subscription, &ack_handle)
                    .await?;
                handled += 1;
            }
            Ok(JobOutcome::Failed(reason)) => {
                error!("Job failed: {}", reason);
                if nack_on_failure {
                    client
                        .nack_long_running_job(subscription, &ack_handle)
                        .await?;
                } else {
                    client.cancel_long_running_job(&ack_handle);
                }
            }
            Ok(JobOutcome::Interrupted) => {
                client
                    .nack_long_running_job(subscription, &ack_handle)
                    .await?;
                break;
            }
            Err(e) => {
                client.cancel_long_running_job(&ack_handle);
                return Err(e);
            }
        }

        if !drain {
            break;
        }
    }

    info!("Handled {} job(s)", handled);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    metrics::init_metrics();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.cli_config(), file_config)?;
    info!(
        "Using project {} at {}",
        config.project_id, config.endpoint
    );
    let client = config.build_client()?;

    match cli_args.command {
        CliCommand::Pull {
            subscription,
            max_messages,
            wait,
            ack,
        } => {
            let result = client
                .pull(
                    &subscription,
                    PullOptions {
                        return_immediately: !wait,
                        max_messages,
                    },
                )
                .await?;
            for message in &result.messages {
                println!("{}", message_json(message));
            }
            if ack && !result.is_empty() {
                client
                    .acknowledge(&subscription, &result.ack_handles())
                    .await?;
                info!("Acknowledged {} message(s)", result.messages.len());
            }
        }
        CliCommand::Ack {
            subscription,
            ack_ids,
        } => {
            let handles: Vec<AckHandle> = ack_ids.into_iter().map(AckHandle::from).collect();
            client.acknowledge(&subscription, &handles).await?;
            info!("Acknowledged {} message(s)", handles.len());
        }
        CliCommand::Modack {
            subscription,
            deadline_sec,
            ack_ids,
        } => {
            let handles: Vec<AckHandle> = ack_ids.into_iter().map(AckHandle::from).collect();
            client
                .modify_ack_deadline(&subscription, &handles, Duration::from_secs(deadline_sec))
                .await?;
            info!(
                "Set ack deadline of {} message(s) to {}s",
                handles.len(),
                deadline_sec
            );
        }
        CliCommand::Publish {
            topic,
            messages,
            attributes,
        } => {
            let outgoing: Vec<OutgoingMessage> = messages
                .into_iter()
                .map(|m| {
                    attributes
                        .iter()
                        .fold(OutgoingMessage::new(m), |msg, (k, v)| {
                            msg.with_attribute(k.clone(), v.clone())
                        })
                })
                .collect();
            let result = client.publish(&topic, &outgoing).await?;
            for id in result.message_ids {
                println!("{}", id);
            }
        }
        CliCommand::Work {
            subscription,
            command,
            drain,
            nack_on_failure,
            print_metrics,
        } => {
            let result = work(
                &client,
                &config,
                &subscription,
                &command,
                drain,
                nack_on_failure,
            )
            .await;
            let stopped = client.shutdown();
            if stopped > 0 {
                warn!("Stopped renewals of {} unfinished job(s)", stopped);
            }
            if print_metrics {
                eprintln!("{}", metrics::render());
            }
            result?;
        }
    }

    Ok(())
}
