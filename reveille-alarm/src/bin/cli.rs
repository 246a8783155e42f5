//! Command-line interface for the alarm daemon.
//!
//! This binary manages alarms and inspects the schedule through the
//! daemon's HTTP API.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use reveille_alarm::api_client::types::{AlarmRequest, AlarmView};
use reveille_alarm::api_client::{self, DEFAULT_BASE_URL};

#[derive(Parser)]
#[command(name = "reveille-cli", version, about = "Control the reveille alarm daemon")]
struct Args {
    /// API base URL.
    #[arg(long, env = "REVEILLE_API_URL", default_value = DEFAULT_BASE_URL)]
    api_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all alarms.
    List,
    /// Show the next scheduled wake.
    Next,
    /// Create an alarm.
    Add {
        /// Time of day, `HH:MM`.
        time: String,
        /// Repeat days, e.g. `mon,wed,fri`. Omit for a one-shot alarm.
        #[arg(long, value_delimiter = ',')]
        days: Vec<String>,
        #[arg(long, default_value = "")]
        label: String,
        /// Sound a pre-alarm this many minutes early.
        #[arg(long)]
        pre_alarm: Option<u32>,
        #[arg(long)]
        snooze: Option<u32>,
        /// Stop ringing after this many unattended minutes; 0 never stops.
        #[arg(long)]
        auto_silence: Option<u32>,
        /// Delete the alarm once dismissed (one-shot alarms only).
        #[arg(long)]
        delete_after_dismiss: bool,
        #[arg(long)]
        no_vibrate: bool,
    },
    Enable {
        id: String,
    },
    Disable {
        id: String,
    },
    /// Dismiss the current occurrence.
    Dismiss {
        id: String,
    },
    /// Snooze a ringing alarm.
    Snooze {
        id: String,
        /// Minutes; defaults to the alarm's snooze duration.
        #[arg(long)]
        minutes: Option<u32>,
    },
    Delete {
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = api_client::Client::with_base_url(args.api_url);

    match args.command {
        Command::List => {
            let alarms = client.list_alarms().await?;
            if alarms.is_empty() {
                println!("No alarms");
            }
            for alarm in &alarms {
                print_alarm(alarm);
            }
        }
        Command::Next => {
            let next = client.next_wake().await?;
            match (next.alarm_id, next.local_time, next.kind) {
                (Some(id), Some(time), Some(kind)) => println!("{time}  {id}  ({kind})"),
                _ => println!("Nothing scheduled"),
            }
            if let Some(fault) = next.fault {
                println!("Scheduling fault: {fault}");
            }
        }
        Command::Add {
            time,
            days,
            label,
            pre_alarm,
            snooze,
            auto_silence,
            delete_after_dismiss,
            no_vibrate,
        } => {
            let (hour, minute) = parse_time(&time)?;
            let request = AlarmRequest {
                days,
                label,
                vibrate: !no_vibrate,
                pre_alarm: pre_alarm.is_some(),
                pre_alarm_minutes: pre_alarm,
                snooze_minutes: snooze,
                auto_silence_minutes: auto_silence,
                delete_after_dismiss,
                ..AlarmRequest::new(hour, minute)
            };
            print_alarm(&client.create_alarm(&request).await?);
        }
        Command::Enable { id } => print_alarm(&client.set_enabled(&id, true).await?),
        Command::Disable { id } => print_alarm(&client.set_enabled(&id, false).await?),
        Command::Dismiss { id } => match client.dismiss(&id).await? {
            Some(alarm) => print_alarm(&alarm),
            None => println!("Dismissed and deleted {id}"),
        },
        Command::Snooze { id, minutes } => print_alarm(&client.snooze(&id, minutes).await?),
        Command::Delete { id } => {
            client.delete_alarm(&id).await?;
            println!("Deleted {id}");
        }
    }

    Ok(())
}

fn parse_time(time: &str) -> Result<(u8, u8)> {
    let Some((hour, minute)) = time.split_once(':') else {
        bail!("expected HH:MM, got {time:?}");
    };
    let hour = hour.parse().with_context(|| format!("invalid hour in {time:?}"))?;
    let minute = minute
        .parse()
        .with_context(|| format!("invalid minute in {time:?}"))?;
    Ok((hour, minute))
}

fn print_alarm(alarm: &AlarmView) {
    let days = if alarm.days.is_empty() {
        "once".to_string()
    } else {
        alarm.days.join(",")
    };
    let next = alarm
        .next_wake
        .map(|at| format!("  next {}", at.format("%Y-%m-%d %H:%M UTC")))
        .unwrap_or_default();
    println!(
        "{}  {:02}:{:02}  {:<16}  {:<16}  {}{}",
        alarm.id, alarm.hour, alarm.minute, days, alarm.state, alarm.label, next
    );
}
