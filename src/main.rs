// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use clap::{Parser, Subcommand};
use log::LevelFilter;
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;
use xmodem::{Config, RealSerialPort, Receiver, Sender, TransferError};

#[derive(Parser)]
#[command(name = "xmodem")]
#[command(about = "XMODEM file transfer over RS-232", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,

    /// Consecutive NAKs or silent windows tolerated before giving up
    #[arg(long, default_value = "10", value_name = "COUNT")]
    retries: u32,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file using XMODEM
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive a file using XMODEM
    Receive {
        /// Where to write the received file
        file: PathBuf,

        /// Keep the SUB (0x1A) padding at the end of the last block
        #[arg(long)]
        keep_padding: bool,
    },
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn init_logging(debug: bool) {
    let level = if debug { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .parse_default_env()
        .init();
}

fn exit_with(msg: &str) -> ! {
    eprintln!("Error: {}", msg);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let data_bits = parse_data_bits(cli.data_bits).unwrap_or_else(|e| exit_with(&e));
    let parity = parse_parity(&cli.parity).unwrap_or_else(|e| exit_with(&e));
    let stop_bits = parse_stop_bits(cli.stop_bits).unwrap_or_else(|e| exit_with(&e));

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => exit_with(&format!("Failed to open serial port: {}", e)),
    };

    let config = Config::default().with_max_retries(cli.retries);

    match cli.command {
        Commands::Send { file } => {
            println!("\nSending file: {}", file.display());
            match send_file(serial_port, file, config) {
                Ok(bytes) => println!("\nFile sent successfully! ({} bytes)", bytes),
                Err(e) => exit_with(&format!("Send failed: {}", e)),
            }
        }
        Commands::Receive { file, keep_padding } => {
            println!("\nReceiving file: {}", file.display());
            let config = config.with_strip_padding(!keep_padding);
            match receive_file(serial_port, file, config) {
                Ok(bytes) => println!("\nFile received successfully! ({} bytes)", bytes),
                Err(e) => exit_with(&format!("Receive failed: {}", e)),
            }
        }
    }
}

fn send_file(serial_port: RealSerialPort, file: PathBuf, config: Config) -> Result<u64, TransferError> {
    if !file.is_file() {
        return Err(TransferError::File(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", file.display()),
        )));
    }

    let mut sender = Sender::new(Box::new(serial_port), config);
    sender.send_file(&file)
}

fn receive_file(serial_port: RealSerialPort, file: PathBuf, config: Config) -> Result<u64, TransferError> {
    if let Some(dir) = file.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            return Err(TransferError::File(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Output directory not found: {}", dir.display()),
            )));
        }
    }

    let mut receiver = Receiver::new(Box::new(serial_port), config);
    receiver.receive_file(&file)
}
