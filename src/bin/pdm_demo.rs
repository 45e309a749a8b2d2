use clap::{App, Arg, SubCommand};
use colored::*;
use pdmcore::commands::Pdm;
use pdmcore::message::{Message, MessageType};
use pdmcore::nonce::SequentialNonceGen;
use pdmcore::radio::ScriptedRadioLink;
use pdmcore::store::AtomicFileStore;
use pdmcore::transport::SystemClock;
use rust_decimal::Decimal;
use std::str::FromStr;

const DEFAULT_STATE_PATH: &str = "pod-state.json";

fn main() {
    tracing_subscriber::fmt::init();

    let matches = App::new("pdm-demo")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("Exercises the PDM command core against a scripted pod, since no real radio is wired up here")
        .arg(
            Arg::with_name("state")
                .long("state")
                .value_name("PATH")
                .help("Path to the persisted pod state file")
                .takes_value(true)
                .default_value(DEFAULT_STATE_PATH)
                .global(true),
        )
        .subcommand(SubCommand::with_name("status").about("Request a status update from the pod"))
        .subcommand(
            SubCommand::with_name("bolus")
                .about("Deliver an immediate bolus")
                .arg(
                    Arg::with_name("units")
                        .required(true)
                        .help("Bolus amount in insulin units, e.g. 1.25"),
                ),
        )
        .subcommand(SubCommand::with_name("cancel-bolus").about("Cancel a running bolus"))
        .get_matches();

    if let Err(e) = run(&matches) {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(matches: &clap::ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let state_path = matches.value_of("state").unwrap_or(DEFAULT_STATE_PATH);
    let store = AtomicFileStore::new(state_path);

    // A real deployment wires a RadioLink that actually talks to the pod's
    // sub-GHz radio; the demo scripts one canned status response so the
    // command flow can be exercised end to end without hardware. The bolus
    // byte reflects whichever outcome the invoked subcommand expects the
    // pod to confirm.
    let bolus_byte: u8 = match matches.subcommand_name() {
        Some("bolus") => 2, // Immediate
        _ => 0,             // NotRunning
    };
    let mut radio = ScriptedRadioLink::new();
    let mut response = Message::new(MessageType::Pod, 0x6600_0001, 0);
    let mut status_body = vec![6u8, 0, 0, bolus_byte, 0, 0, 0, 0, 0, 0x03, 0];
    status_body[10] = 0xE8;
    response.add_command(0x1d, status_body);
    radio.push_response(response);

    let nonce = SequentialNonceGen::new(1, 2, Some(5), 0);
    let mut pdm = Pdm::new(radio, nonce, SystemClock, store, 1, 2)?;
    if pdm.pod().radio_address.is_none() {
        pdm.pod_mut().radio_address = Some(0x6600_0001);
        pdm.pod_mut().state_progress = pdmcore::PodProgress::Running;
    }

    match matches.subcommand() {
        ("status", _) => {
            pdm.update_pod_status(0)?;
            println!(
                "{} progress={:?} reservoir={}",
                "ok:".green().bold(),
                pdm.pod().state_progress,
                pdm.pod().insulin_reservoir
            );
        }
        ("bolus", Some(sub)) => {
            let units = sub.value_of("units").expect("required");
            let amount = Decimal::from_str(units)?;
            pdm.bolus(amount, None, 0)?;
            println!("{} delivering {} U", "ok:".green().bold(), amount);
        }
        ("cancel-bolus", _) => {
            pdm.cancel_bolus(true)?;
            println!("{}", "ok: bolus cancelled".green().bold());
        }
        _ => {
            println!("{}", "no subcommand given, see --help".yellow());
        }
    }

    Ok(())
}
