//! mqttqos - publish one message at each QoS level and report the
//! acknowledgments the broker sent back.
//!
//! Usage: mqttqos <host> <port>

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mqttqos::{PublishResult, QoS, Session, SessionConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Publish at QoS 0, 1 and 2 and print the acknowledgments.
#[derive(Parser, Debug)]
#[command(name = "mqttqos")]
#[command(about = "Publish at QoS 0, 1 and 2 and print the acknowledgments")]
struct Args {
    /// Broker host
    host: String,

    /// Broker port
    port: u16,

    /// Client identifier (empty lets the broker assign one)
    #[arg(long, default_value = "")]
    client_id: String,

    /// Username
    #[arg(short, long)]
    username: Option<String>,

    /// Password
    #[arg(short, long)]
    password: Option<String>,

    /// Keep alive in seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    keep_alive: u16,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[arg(long, default_value = "warn")]
    log: String,
}

fn print_publish(topic: &str, result: &mqttqos::Result<PublishResult>) {
    match result {
        Ok(pubres) => {
            println!("publish {}: ok", topic);
            if let Some(puback) = &pubres.puback {
                println!("  {:?}", puback);
            }
            if let Some(pubrec) = &pubres.pubrec {
                println!("  {:?}", pubrec);
            }
            if let Some(pubcomp) = &pubres.pubcomp {
                println!("  {:?}", pubcomp);
            }
        }
        Err(e) => println!("publish {}: {}", topic, e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log).context("invalid --log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = format!("{}:{}", args.host, args.port);
    let mut config = SessionConfig::new(&addr, args.client_id)
        .with_keep_alive(args.keep_alive)
        .with_connect_timeout(Duration::from_secs(args.timeout));
    if let Some(username) = args.username {
        config = config.with_credentials(username, args.password.unwrap_or_default());
    }

    let session = Session::connect(config)
        .await
        .with_context(|| format!("connecting to {}", addr))?;
    println!("connected: {:?}", session.connack());

    // Identifiers for QoS 1 and 2 are reserved up front, before any flow runs.
    let id2 = session.acquire_packet_id()?;
    let id3 = session.acquire_packet_id()?;
    debug!(%id2, %id3, "reserved packet identifiers");

    let (r1, r2, r3) = tokio::join!(
        session.publish("topic1", "payload1", QoS::AtMostOnce),
        session.publish_with_id(id2, "topic2", "payload2", QoS::AtLeastOnce),
        session.publish_with_id(id3, "topic3", "payload3", QoS::ExactlyOnce),
    );
    print_publish("topic1", &r1);
    print_publish("topic2", &r2);
    print_publish("topic3", &r3);

    session.disconnect().await?;
    println!("disconnected");

    if r1.is_err() || r2.is_err() || r3.is_err() {
        anyhow::bail!("not every publish completed");
    }
    Ok(())
}
