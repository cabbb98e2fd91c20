//! Connects to one camera, runs capability discovery and prints what the
//! device reported.
//!
//! ```text
//! cargo run -p pmoonvif --example device_info -- session.yaml
//! cargo run -p pmoonvif --example device_info -- 192.168.1.64 admin secret
//! RUST_LOG=pmoonvif=debug cargo run -p pmoonvif --example device_info -- ...
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Sender, unbounded};
use pmoonvif::profiles::streaming;
use pmoonvif::{
    Command, Fault, OnvifResponse, OnvifSession, Params, ProfileKind, SessionConfig,
    SessionObserver,
};

enum Outcome {
    Ready,
    Reply(Command, OnvifResponse),
    Failed(String),
}

struct ChannelObserver {
    tx: Sender<Outcome>,
}

impl SessionObserver for ChannelObserver {
    fn on_failure(&self, fault: &Fault) {
        let _ = self.tx.send(Outcome::Failed(fault.full_description()));
    }

    fn on_initialized(&self) {
        let _ = self.tx.send(Outcome::Ready);
    }

    fn on_response(&self, command: Command, response: &OnvifResponse) {
        let _ = self.tx.send(Outcome::Reply(command, response.clone()));
    }
}

fn load_config() -> Result<SessionConfig> {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        2 => SessionConfig::load(&args[1]),
        4 => Ok(SessionConfig::new(&args[1], 80, &args[2], &args[3])),
        _ => Err(anyhow!(
            "Usage:\n  {0} <session.yaml>\n  {0} <address> <username> <password>",
            args[0]
        )),
    }
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let config = load_config()?;
    let wait = config.request_timeout() + Duration::from_secs(5);
    let session = OnvifSession::new(&config).context("Cannot start the delivery thread")?;

    let (tx, rx) = unbounded();
    let observer = Arc::new(ChannelObserver { tx });
    session.attach_observer(&observer);

    match rx.recv_timeout(wait * 6).context("Discovery timed out")? {
        Outcome::Ready => {}
        Outcome::Failed(fault) => return Err(anyhow!("Discovery failed: {}", fault)),
        Outcome::Reply(..) => return Err(anyhow!("Unexpected reply during discovery")),
    }

    println!("Device: {}", session.base_url());
    println!(
        "{}",
        serde_json::to_string_pretty(&session.device_information())?
    );
    println!("Profiles: {:?}", session.registered_profiles());
    println!("Scopes:");
    for scope in session.scopes() {
        println!("  [{}] {}", scope.definition, scope.item);
    }
    println!("Services:");
    for service in session.services() {
        println!("  {} -> {}", service.namespace, service.xaddr);
    }

    if !session
        .available_commands(ProfileKind::S)
        .contains(&streaming::GET_PROFILES)
    {
        return Ok(());
    }

    session.perform_request(streaming::GET_PROFILES, Params::new(), None);
    let profiles = match rx.recv_timeout(wait).context("GetProfiles timed out")? {
        Outcome::Reply(_, OnvifResponse::Profiles(profiles)) => profiles,
        Outcome::Failed(fault) => return Err(anyhow!("GetProfiles failed: {}", fault)),
        _ => return Err(anyhow!("Unexpected reply to GetProfiles")),
    };

    for profile in &profiles {
        session.perform_request(
            streaming::GET_STREAM_URI,
            streaming::stream_uri_params(&profile.token),
            None,
        );
        match rx.recv_timeout(wait).context("GetStreamUri timed out")? {
            Outcome::Reply(_, response) => {
                println!("{}", serde_json::to_string_pretty(&response)?)
            }
            Outcome::Failed(fault) => println!("{}: {}", profile.token, fault),
            Outcome::Ready => {}
        }
    }

    Ok(())
}
