//! AtlasKV CLI Client
//!
//! Command-line interface for talking to an AtlasKV (or any RESP) store.

use std::process;
use std::time::Duration;

use atlaskv_client::{
    await_all, Awaitable, Client, ClientConfig, Commands, Connection, Message, Utf8Codec,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasKV CLI
#[derive(Parser, Debug)]
#[command(name = "atlaskv-cli")]
#[command(about = "CLI for AtlasKV key-value store")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    server: String,

    /// Unix socket path (overrides --server)
    #[arg(short, long)]
    unix: Option<String>,

    /// Password sent as AUTH on connect
    #[arg(short, long)]
    password: Option<String>,

    /// Database index sent as SELECT on connect
    #[arg(short, long)]
    database: Option<u32>,

    /// Per-command timeout in milliseconds
    #[arg(short, long, default_value = "5000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Expire after this many seconds
        #[arg(long)]
        ex: Option<u64>,
    },

    /// Delete one or more keys
    Del {
        /// The keys to delete
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Increment an integer value
    Incr {
        key: String,

        /// Amount to add
        #[arg(long, default_value = "1")]
        by: i64,
    },

    /// Ping the server
    Ping,

    /// Publish a message to a channel
    Publish { channel: String, message: String },

    /// Print messages published to channels until interrupted
    Subscribe {
        #[arg(required = true)]
        channels: Vec<String>,
    },

    /// Pipeline INCR on a key and report throughput
    Pipeline {
        key: String,

        /// Number of commands in flight at once
        #[arg(short, long, default_value = "10000")]
        count: usize,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,atlaskv_client=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("(error) {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> atlaskv_client::Result<()> {
    let timeout = Duration::from_millis(args.timeout_ms);

    let mut builder = ClientConfig::builder()
        .address(&args.server)
        .command_timeout(Some(timeout));
    #[cfg(unix)]
    if let Some(path) = &args.unix {
        builder = builder.unix_socket(path);
    }
    if let Some(password) = &args.password {
        builder = builder.password(password);
    }
    if let Some(db) = args.database {
        builder = builder.database(db);
    }
    let client = Client::new(builder.build())?;
    let commands = Commands::new(Utf8Codec);

    match args.command {
        Action::Get { key } => {
            let connection = client.connect()?;
            match connection.submit_blocking(commands.get(&key)?, timeout)? {
                Some(value) => println!("\"{}\"", value),
                None => println!("(nil)"),
            }
            connection.close(timeout);
        }
        Action::Set { key, value, ex } => {
            let connection = client.connect()?;
            let command = match ex {
                Some(seconds) => commands.set_ex(&key, &value, seconds)?,
                None => commands.set(&key, &value)?,
            };
            connection.submit_blocking(command, timeout)?;
            println!("OK");
            connection.close(timeout);
        }
        Action::Del { keys } => {
            let connection = client.connect()?;
            let removed = connection.submit_blocking(commands.del(&keys)?, timeout)?;
            println!("(integer) {}", removed);
            connection.close(timeout);
        }
        Action::Incr { key, by } => {
            let connection = client.connect()?;
            let value = connection.submit_blocking(commands.incr_by(&key, by)?, timeout)?;
            println!("(integer) {}", value);
            connection.close(timeout);
        }
        Action::Ping => {
            let connection = client.connect()?;
            let reply = connection.submit_blocking(commands.ping(), timeout)?;
            println!("{}", reply);
            connection.close(timeout);
        }
        Action::Publish { channel, message } => {
            let connection = client.connect()?;
            let receivers =
                connection.submit_blocking(commands.publish(&channel, &message)?, timeout)?;
            println!("(integer) {}", receivers);
            connection.close(timeout);
        }
        Action::Subscribe { channels } => subscribe(&client, channels, timeout)?,
        Action::Pipeline { key, count } => {
            let connection = client.connect()?;
            pipeline(&connection, &commands, key, count, timeout)?;
            connection.close(timeout);
        }
    }
    Ok(())
}

fn subscribe(client: &Client, channels: Vec<String>, timeout: Duration) -> atlaskv_client::Result<()> {
    let connection = client.connect_pubsub()?;
    for channel in channels {
        let ack = connection.subscribe(channel.clone(), |message: &Message| {
            println!(
                "{}: {}",
                String::from_utf8_lossy(&message.channel),
                String::from_utf8_lossy(&message.payload)
            );
        })?;
        let count = ack.get(timeout)?;
        println!("Subscribed to {} ({} active)", channel, count);
    }

    // Listeners run on the event lanes; keep the connection alive
    loop {
        std::thread::park();
    }
}

fn pipeline(
    connection: &Connection,
    commands: &Commands<Utf8Codec>,
    key: String,
    count: usize,
    timeout: Duration,
) -> atlaskv_client::Result<()> {
    let started = std::time::Instant::now();
    let mut handles = Vec::with_capacity(count);
    for _ in 0..count {
        handles.push(connection.submit(commands.incr(&key)?)?);
    }

    let waiting: Vec<&dyn Awaitable> = handles.iter().map(|h| h as &dyn Awaitable).collect();
    let wait = timeout.saturating_mul(10);
    if !await_all(wait, &waiting) {
        eprintln!("(warning) not every reply arrived within {:?}", wait);
    }

    let last = match handles.last() {
        Some(handle) => handle.get(timeout)?,
        None => 0,
    };
    let elapsed = started.elapsed();
    println!(
        "{} commands in {:?} ({:.0} ops/sec), {} = {}",
        count,
        elapsed,
        count as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        key,
        last
    );
    Ok(())
}
