use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use diceroll_client::{
    GameController,
    Session,
    SessionCommand,
    http::{
        HttpEventSource,
        HttpGateway,
    },
    types::{
        Address,
        BetResult,
        GameSnapshot,
    },
};
use std::time::Duration;
use tokio::time;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:4000/";
const WATCH_REFRESH_PERIOD: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "diceroll",
    about = "Owner and player actions against the on-chain dice roll game",
    version,
    group(
        ArgGroup::new("network")
            .args(["local", "rpc_url"])
            .required(true)
    )
)]
struct Cli {
    /// Connect to a local node bridge
    #[arg(long)]
    local: bool,
    /// Connect to a custom node bridge endpoint
    #[arg(long)]
    rpc_url: Option<String>,
    /// Account address to act as
    #[arg(long)]
    address: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current game snapshot
    Status,
    /// Follow the game live until interrupted
    Watch,
    /// Owner: start the next game cycle
    StartGame,
    /// Owner: roll the dice and distribute rewards
    Roll,
    /// Owner: set the owner reward percentage (0-10)
    SetReward { pct: u8 },
    /// Owner: set the predefined betting amount in wei
    SetBetAmount { amount: u128 },
    /// Owner: set the player limit
    SetMaxPlayers { max: u32 },
    /// Player: enter the game with a stake in wei
    Enter { amount: u128 },
    /// Player: leave the game before it starts
    Exit,
    /// Player: bet on a dice outcome (1-6)
    Bet { value: u8 },
    /// Player: cancel the current bet
    CancelBet,
    /// Show results for a game cycle (latest finished cycle when omitted)
    Results { game_id: Option<u64> },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    tracing::info!("starting diceroll client");
    let cli = Cli::parse();
    let url = if cli.local {
        DEFAULT_LOCAL_RPC_URL.to_string()
    } else {
        cli.rpc_url
            .clone()
            .ok_or_else(|| eyre!("select a network with --local or --rpc-url <url>"))?
    };
    let address: Address = cli
        .address
        .parse()
        .map_err(|err| eyre!("--address is not a valid account address: {err}"))?;

    let gateway = HttpGateway::new(url)?;
    let mut controller = GameController::new(gateway.clone(), gateway.clone(), address);
    controller
        .refresh_snapshot()
        .await
        .wrap_err("failed to read game state from the bridge")?;

    match cli.command {
        Command::Status => print_snapshot(&controller.snapshot()),
        Command::Watch => run_watch(controller, gateway).await?,
        Command::StartGame => {
            controller.start_game().await?;
            println!("{}", controller.status());
        }
        Command::Roll => {
            println!("Rolling... waiting for randomness fulfillment");
            let fulfillment = controller.roll_dice().await?;
            println!(
                "Rewards distributed (request {}, word {})",
                fulfillment.request.request_id, fulfillment.random_word
            );
            let finished = controller.snapshot().game_counter.saturating_sub(1);
            match controller.my_result(finished) {
                Some(result) => print_result(&result),
                None => println!("You did not participate in game {finished}."),
            }
        }
        Command::SetReward { pct } => {
            controller.set_owner_reward_percentage(pct).await?;
            println!("{}", controller.status());
        }
        Command::SetBetAmount { amount } => {
            controller.set_predefined_betting_amount(amount).await?;
            println!("{}", controller.status());
        }
        Command::SetMaxPlayers { max } => {
            controller.set_max_players(max).await?;
            println!("{}", controller.status());
        }
        Command::Enter { amount } => {
            controller.enter_game(amount).await?;
            println!("{}", controller.status());
        }
        Command::Exit => {
            controller.exit_game().await?;
            println!("{}", controller.status());
        }
        Command::Bet { value } => {
            controller.place_bet(value).await?;
            println!("{}", controller.status());
        }
        Command::CancelBet => {
            controller.cancel_bet().await?;
            println!("{}", controller.status());
        }
        Command::Results { game_id } => {
            let game_id = game_id
                .unwrap_or_else(|| controller.snapshot().game_counter.saturating_sub(1));
            let results = controller.fetch_results(game_id).await?;
            if results.is_empty() {
                println!("No game history found for game {game_id}.");
            } else {
                for result in &results {
                    print_result(result);
                }
            }
            match controller.my_result(game_id) {
                Some(_) => {}
                None => println!("You did not participate in game {game_id}."),
            }
        }
    }
    Ok(())
}

/// Runs a live session: events keep the store in sync, a slow ticker forces
/// a full refresh, and ctrl-c tears everything down.
async fn run_watch(
    controller: GameController<HttpGateway, HttpGateway>,
    gateway: HttpGateway,
) -> Result<()> {
    let events = HttpEventSource::new(gateway);
    let session = Session::connect(controller, events).await?;
    let handle = session.handle();
    let store = session.controller().store();
    let mut running = tokio::spawn(session.run());

    let mut ticker = time::interval(WATCH_REFRESH_PERIOD);
    let mut last_printed: Option<GameSnapshot> = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = handle.send(SessionCommand::Refresh);
                let snapshot = store.snapshot();
                if last_printed.as_ref() != Some(&snapshot) {
                    print_snapshot(&snapshot);
                    last_printed = Some(snapshot);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                handle.shutdown();
                break;
            }
            outcome = &mut running => {
                outcome??;
                return Err(eyre!("session ended unexpectedly; check the bridge connection"));
            }
        }
    }
    running.await??;
    Ok(())
}

fn print_snapshot(snapshot: &GameSnapshot) {
    println!("Game started:              {}", if snapshot.started { "Yes" } else { "No" });
    println!("Players:                   {}", snapshot.players.len());
    println!("Game counter:              {}", snapshot.game_counter);
    println!("Game balance:              {} wei", snapshot.balance);
    println!("Total betted amount:       {} wei", snapshot.total_bet_amount);
    println!("Owner reward percentage:   {}%", snapshot.owner_reward_percentage);
    println!("Predefined betting amount: {} wei", snapshot.predefined_betting_amount);
    println!("Max players:               {}", snapshot.max_players);
}

fn print_result(result: &BetResult) {
    println!(
        "Participant: {} | Chosen: {} | Rolled: {} | {} | Amount won: {} wei | Balance: {} wei",
        result.participant,
        result.chosen_value,
        result.rolled_value,
        if result.won { "Won" } else { "Lost" },
        result.amount_won,
        result.balance_after,
    );
}
