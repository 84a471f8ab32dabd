//! Node taking part in schain DKG ceremonies.
//!
//! The node watches the mock chain's event log for its schain, deals its
//! polynomial when a ceremony opens, checks the shares dealt to it, and
//! confirms, complains or defends as the ceremony unfolds. Every call is
//! gated on the matching module predicate.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use schain_dkg::EncryptionKeypair;
use schain_dkg_module::{DkgEvent, DkgQuery, DkgQueryResponse};
use schain_types::{compute_group_id, Address, GroupId, NodeId};

mod driver;
mod rpc;
mod store;

use driver::{Action, Driver};
use rpc::ChainClient;

/// Ticks an action may wait on its predicate before it is dropped.
const MAX_ATTEMPTS: u32 = 30;

#[derive(Parser)]
#[command(name = "dkg-node")]
#[command(about = "Schain DKG participant node")]
struct Cli {
    /// Node id in the registry
    #[arg(long)]
    node: NodeId,

    /// Mock chain RPC endpoint
    #[arg(long, default_value = "http://127.0.0.1:9944")]
    rpc: String,

    /// Directory holding the encryption key and produced key shares
    #[arg(long, default_value = "./node-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the encryption key pair for this node
    Keygen,

    /// Add this node to the chain's node registry
    Register {
        /// Hex address of the validator answering for this node (defaults to the owner)
        #[arg(long)]
        validator: Option<String>,
    },

    /// Take part in every ceremony of an schain
    Run {
        /// Schain name
        #[arg(long)]
        schain: String,

        /// Seconds between polls of the chain
        #[arg(long, default_value = "2")]
        poll_interval: u64,
    },

    /// Print the ceremony state of an schain
    Status {
        #[arg(long)]
        schain: String,
    },

    /// Print the encryption public key and owner address
    ExportPubkey,
}

struct Pending {
    action: Action,
    attempts: u32,
}

/// Event loop for one schain.
struct Runner {
    client: ChainClient,
    driver: Driver,
    owner: Address,
    group: GroupId,
    schain: String,
    data_dir: PathBuf,
    cursor: u64,
    pending: VecDeque<Pending>,
}

impl Runner {
    async fn run(&mut self, poll_interval: u64) -> Result<()> {
        info!(
            node = self.driver.node(),
            schain = %self.schain,
            group = hex::encode(self.group),
            "Watching for ceremonies"
        );

        loop {
            if let Err(e) = self.tick().await {
                warn!("Poll failed: {}", e);
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(poll_interval)).await;
        }
    }

    async fn tick(&mut self) -> Result<()> {
        let events = self.client.events(self.cursor).await?;
        for record in events {
            self.cursor = record.sequence + 1;
            if *record.event.group() == self.group {
                self.on_event(&record.event).await?;
            }
        }

        self.queue_timeout_complaints().await?;
        self.flush().await
    }

    async fn on_event(&mut self, event: &DkgEvent) -> Result<()> {
        match event {
            DkgEvent::ChannelOpened { group_size, .. } => {
                self.pending.clear();
                let info = self
                    .client
                    .group(&self.group)
                    .await?
                    .ok_or_else(|| anyhow!("Group {} not found", self.schain))?;
                if info.members.len() as u32 != *group_size {
                    debug!(group_size, "Roster changed since the ceremony opened");
                }
                if let Some(action) =
                    self.driver
                        .start(info.members, info.encryption_keys, &mut OsRng)?
                {
                    self.push(action);
                }
            }

            DkgEvent::SuccessfulDkg { .. } if self.driver.is_running() => {
                let output = self.driver.finalize()?;
                let path = store::output_file(&self.data_dir, self.driver.node(), &self.schain);
                store::ShareFile::new(&self.group, &output).save(&path)?;
                info!(
                    group_public_key = hex::encode(output.group_public_key.0),
                    "Ceremony succeeded, key share saved to {:?}", path
                );
            }

            DkgEvent::BadGuy { node, .. } if *node == self.driver.node() => {
                error!(node, "Found guilty in ceremony");
            }

            event => {
                for action in self.driver.handle_event(event) {
                    self.push(action);
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, action: Action) {
        self.pending.push_back(Pending {
            action,
            attempts: 0,
        });
    }

    async fn queue_timeout_complaints(&mut self) -> Result<()> {
        for accused in self.driver.timeout_targets() {
            let queued = self
                .pending
                .iter()
                .any(|p| p.action == Action::Complaint { accused });
            if queued {
                continue;
            }
            let possible = self
                .client
                .check(DkgQuery::IsComplaintPossible {
                    group: self.group,
                    accuser: self.driver.node(),
                    accused,
                    caller: self.owner,
                })
                .await?;
            if possible {
                info!(accused, "Complaint window open");
                self.push(Action::Complaint { accused });
            }
        }
        Ok(())
    }

    fn predicate(&self, action: &Action) -> DkgQuery {
        let (group, node, caller) = (self.group, self.driver.node(), self.owner);
        match action {
            Action::Broadcast(_) => DkgQuery::IsBroadcastPossible { group, node, caller },
            Action::Alright => DkgQuery::IsAlrightPossible { group, node, caller },
            Action::Complaint { accused } => DkgQuery::IsComplaintPossible {
                group,
                accuser: node,
                accused: *accused,
                caller,
            },
            Action::PreResponse(_) => DkgQuery::IsPreResponsePossible { group, node, caller },
            Action::Response(_) => DkgQuery::IsResponsePossible { group, node, caller },
        }
    }

    /// Submit every pending action whose predicate holds.
    ///
    /// On a transport failure every unsent action stays queued in order and
    /// the error is returned; the next tick resumes from the failed action.
    async fn flush(&mut self) -> Result<()> {
        let mut waiting = VecDeque::new();

        while let Some(mut pending) = self.pending.pop_front() {
            match self.try_submit(&mut pending).await {
                Ok(true) => waiting.push_back(pending),
                Ok(false) => {}
                Err(e) => {
                    waiting.push_back(pending);
                    waiting.append(&mut self.pending);
                    self.pending = waiting;
                    return Err(e);
                }
            }
        }

        self.pending = waiting;
        Ok(())
    }

    /// Try one action. Returns whether it stays queued.
    async fn try_submit(&self, pending: &mut Pending) -> Result<bool> {
        let name = pending.action.name();
        if !self.client.check(self.predicate(&pending.action)).await? {
            pending.attempts += 1;
            if pending.attempts >= MAX_ATTEMPTS {
                warn!(action = name, "Giving up, predicate never held");
                return Ok(false);
            }
            debug!(action = name, attempts = pending.attempts, "Not possible yet");
            return Ok(true);
        }

        match self
            .client
            .submit(&self.owner, &self.group, self.driver.node(), &pending.action)
            .await?
        {
            Ok(outcome) => {
                info!(action = name, ?outcome, "Call accepted");
                Ok(false)
            }
            Err(rejection) if rejection.retryable => {
                debug!(action = name, code = %rejection.code, "Rejected, will retry");
                pending.attempts += 1;
                Ok(true)
            }
            Err(rejection) => {
                warn!(
                    action = name,
                    code = %rejection.code,
                    "Call rejected: {}", rejection.message
                );
                Ok(false)
            }
        }
    }
}

async fn print_status(client: &ChainClient, schain: &str) -> Result<()> {
    let group = compute_group_id(schain);
    let block = client.block_info().await?;
    println!("schain:     {} ({})", schain, hex::encode(group));
    println!("block:      {} @ {}", block.height, block.timestamp);

    let opened = client.check(DkgQuery::IsChannelOpened { group }).await?;
    println!("channel:    {}", if opened { "open" } else { "closed" });

    if let DkgQueryResponse::ChannelStarted(Some(started)) =
        client.query(DkgQuery::GetChannelStarted { group }).await?
    {
        println!("started:    block {} @ {}", started.block_height, started.timestamp);
    }

    if let DkgQueryResponse::BroadcastState(Some(state)) =
        client.query(DkgQuery::GetBroadcastState { group }).await?
    {
        let total = state.broadcasted.len();
        println!("broadcasts: {}/{}", state.broadcasted_count, total);
        println!("alright:    {}/{}", state.completed_count, total);
    }

    if let DkgQueryResponse::Complaint(Some(complaint)) =
        client.query(DkgQuery::GetComplaint { group }).await?
    {
        println!(
            "complaint:  {} accused {} at {}{}",
            complaint.accuser,
            complaint.accused,
            complaint.filed_at,
            if complaint.is_response_phase() { " (pre-responded)" } else { "" }
        );
    }

    let current = client.check(DkgQuery::IsLastDkgSuccessful { group }).await?;
    if let DkgQueryResponse::Timestamp(Some(at)) = client
        .query(DkgQuery::GetTimeOfLastSuccessfulDkg { group })
        .await?
    {
        println!(
            "last key:   {}{}",
            at,
            if current { "" } else { " (stale)" }
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dkg_node=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.data_dir)?;
    let key_file = store::key_file(&cli.data_dir, cli.node);

    match cli.command {
        Commands::Keygen => {
            if key_file.exists() {
                return Err(anyhow!("Key file {:?} already exists", key_file));
            }
            let keypair = EncryptionKeypair::generate(&mut OsRng);
            store::save_keypair(&key_file, &keypair)?;

            info!("Keys generated and saved to {:?}", key_file);
            info!("Encryption key: {}", hex::encode(keypair.public_key().0));
        }

        Commands::Register { validator } => {
            let keypair = store::load_keypair(&key_file)?;
            let client = ChainClient::connect(&cli.rpc)?;
            let owner = store::owner_address(keypair.public_key());
            let validator = validator
                .map(|v| -> Result<Address> {
                    hex::decode(v.trim_start_matches("0x"))?
                        .try_into()
                        .map_err(|_| anyhow!("Validator address must be 32 bytes"))
                })
                .transpose()?;

            client
                .register_node(cli.node, &owner, validator.as_ref(), keypair.public_key())
                .await?;
            info!(node = cli.node, owner = hex::encode(owner), "Node registered");
        }

        Commands::Run {
            schain,
            poll_interval,
        } => {
            let keypair = store::load_keypair(&key_file)?;
            let owner = store::owner_address(keypair.public_key());
            let mut runner = Runner {
                client: ChainClient::connect(&cli.rpc)?,
                driver: Driver::new(cli.node, keypair),
                owner,
                group: compute_group_id(&schain),
                schain,
                data_dir: cli.data_dir.clone(),
                cursor: 0,
                pending: VecDeque::new(),
            };
            runner.run(poll_interval.max(1)).await?;
        }

        Commands::Status { schain } => {
            let client = ChainClient::connect(&cli.rpc)?;
            print_status(&client, &schain).await?;
        }

        Commands::ExportPubkey => {
            let keypair = store::load_keypair(&key_file)?;
            println!("{}", hex::encode(keypair.public_key().0));
            println!("{}", hex::encode(store::owner_address(keypair.public_key())));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_runner() -> Runner {
        Runner {
            client: ChainClient::connect("http://127.0.0.1:1").unwrap(),
            driver: Driver::new(0, EncryptionKeypair::generate(&mut OsRng)),
            owner: [1u8; 32],
            group: compute_group_id("test-schain"),
            schain: "test-schain".to_string(),
            data_dir: PathBuf::from("./node-data"),
            cursor: 0,
            pending: VecDeque::new(),
        }
    }

    #[tokio::test]
    async fn test_flush_keeps_queue_when_chain_unreachable() {
        let mut runner = unreachable_runner();
        runner.push(Action::Alright);
        runner.push(Action::Complaint { accused: 3 });

        assert!(runner.flush().await.is_err());

        let queued: Vec<Action> = runner.pending.iter().map(|p| p.action.clone()).collect();
        assert_eq!(queued, vec![Action::Alright, Action::Complaint { accused: 3 }]);
        assert!(runner.pending.iter().all(|p| p.attempts == 0));
    }

    #[tokio::test]
    async fn test_empty_flush_is_noop() {
        let mut runner = unreachable_runner();
        runner.flush().await.unwrap();
        assert!(runner.pending.is_empty());
    }
}
