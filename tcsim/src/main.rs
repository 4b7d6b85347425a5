//! TCS simulator (tcsim)
//!
//! Plays the telescope control system's side of the autoguider link from the
//! command line: sends one autoguider command, waits for the reply on the
//! TCS reply port and prints it. `watch` instead listens on the guide packet
//! port and prints every guide packet until interrupted.

use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;

use agclient::{AgsCommandClient, ReplyListener};
use ngatcil::command;
use ngatcil::error::{CilError, CilResult};
use ngatcil::guide::{GuidePacket, GUIDE_PACKET_LENGTH};
use ngatcil::types::ports;
use ngatcil::udp::UdpServer;

/// How long to wait for a command reply before giving up.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

fn usage() -> ! {
    eprintln!("Usage: tcsim [--host HOST] COMMAND");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  start-session        open a guiding session");
    eprintln!("  end-session          close the guiding session");
    eprintln!("  on-brightest         guide on the brightest object");
    eprintln!("  on-pixel X Y         guide on the object nearest pixel (X, Y)");
    eprintln!("  on-rank N            guide on the Nth brightest object");
    eprintln!("  off                  stop guiding");
    eprintln!("  watch                print guide packets until interrupted");
    process::exit(2);
}

fn parse_pixel(text: &str) -> CilResult<f32> {
    text.parse::<f32>()
        .map_err(|_| CilError::Config(format!("Invalid pixel value: {}", text)))
}

/// Send one command and report the autoguider's reply.
fn run_command(host: &str, args: &[String]) -> CilResult<()> {
    let listener = ReplyListener::start(ports::TCS_REPLY)?;
    let client = AgsCommandClient::connect_default(host)?;

    let seq = match args[0].as_str() {
        "start-session" => client.start_session()?,
        "end-session" => client.end_session()?,
        "on-brightest" => client.guide_on_brightest()?,
        "on-pixel" => {
            if args.len() != 3 {
                usage();
            }
            client.guide_on_pixel(parse_pixel(&args[1])?, parse_pixel(&args[2])?)?
        }
        "on-rank" => {
            if args.len() != 2 {
                usage();
            }
            let rank = args[1]
                .parse::<i32>()
                .map_err(|_| CilError::Config(format!("Invalid rank: {}", args[1])))?;
            client.guide_on_rank(rank)?
        }
        "off" => client.guide_off()?,
        _ => usage(),
    };

    println!("Sent {} (seq {}), waiting for reply...", args[0], seq);
    let reply = listener.wait_for(seq, REPLY_TIMEOUT)?;
    println!(
        "Reply: command {:#x} status {} seq {}",
        reply.command, reply.status, reply.header.seq_num
    );
    Ok(())
}

/// Listen on the guide packet port and print what arrives.
fn run_watch() -> CilResult<()> {
    let mut server = UdpServer::start(ports::TCS_GUIDE, GUIDE_PACKET_LENGTH, |bytes, _peer| {
        let packet = GuidePacket::parse(bytes)?;
        println!("Guide packet: {}", packet);
        Ok(())
    })?;
    println!("Listening for guide packets on port {}...", server.port());

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .map_err(|e| CilError::Config(format!("Error setting Ctrl+C handler: {}", e)))?;

    while running.load(Ordering::SeqCst) && server.is_running() {
        thread::sleep(Duration::from_millis(100));
    }
    server.stop()
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (host, rest) = if args.len() >= 2 && args[0] == "--host" {
        (args[1].clone(), &args[2..])
    } else {
        ("127.0.0.1".to_string(), &args[..])
    };
    if rest.is_empty() {
        usage();
    }

    info!("tcsim targeting autoguider at {}", host);

    let result = match rest[0].as_str() {
        "watch" => run_watch(),
        _ => run_command(&host, rest),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
