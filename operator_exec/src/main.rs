//! # Operator Console
//!
//! Ground side of the system: a TCP server printing the drone's telemetry
//! stream, and a UDP sender for command words typed on standard input.
//!
//! Command words (case-insensitive): `fly`, `samplegps`, `land`, `idle`,
//! `charge`, `abort`. One datagram is sent per valid word; invalid words
//! print a usage hint and send nothing.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use std::env;
use std::io::{BufRead, Read};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::thread;

// Internal
use comms_if::action::Action;
use comms_if::net::NetConfig;

// ---------------------------------------------------------------------------
// MAIN
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    println!("Starting operator console...");

    let args: Vec<String> = env::args().skip(1).collect();
    let net = NetConfig::from_args(&args).wrap_err("Failed to parse the network endpoints")?;

    // ---- TELEMETRY SERVER ----

    let listener = TcpListener::bind(net.telemetry_addr())
        .wrap_err("Failed to bind the telemetry listener")?;
    println!("Telemetry TCP listener created.");

    thread::spawn(move || telemetry_server(listener));

    // ---- COMMAND CHANNEL ----

    let udp = UdpSocket::bind("0.0.0.0:0").wrap_err("Failed to create the command socket")?;
    let fc_addr = net.flight_ctrl_addr();
    println!("UDP socket ready for flight controller commands.");

    // ---- COMMAND LOOP ----

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.wrap_err("Failed to read from stdin")?;

        if line.trim().is_empty() {
            continue;
        }

        match Action::from_operator_str(&line) {
            Some(action) => {
                println!("{}", action);
                udp.send_to(&action.to_wire(), fc_addr)
                    .wrap_err("Failed to send the command datagram")?;
                println!("Sent command '{}' via UDP.", line.trim());
            }
            None => {
                println!("Invalid command: {}", line.trim());
                println!("Valid: fly, samplegps, land, idle, charge, abort");
            }
        }
    }

    println!("\nShutting down cleanly...");
    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Accept one drone connection at a time and print its telemetry raw.
fn telemetry_server(listener: TcpListener) {
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                println!("Telemetry client connected.");
                print_telemetry(stream);
                println!("Telemetry disconnected.");
            }
            Err(e) => eprintln!("Telemetry accept failed: {}", e),
        }
    }
}

/// Print incoming telemetry until the drone disconnects.
fn print_telemetry(mut stream: TcpStream) {
    let mut buf = [0u8; 1024];

    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                println!("[TELEMETRY] {{\n{}}}", text);
            }
        }
    }
}
