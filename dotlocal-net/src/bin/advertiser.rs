// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! mDNS Advertiser
//!
//! This binary:
//! 1. Claims `<hostname>.local` on the network
//! 2. Advertises one DNS-SD service under it, with optional TXT items
//! 3. Optionally browses for peers of the same service type

use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use dotlocal_net::{HickoryCodec, SystemClock, SystemInterface, UdpTransport};
use dotlocal_responder::{Answer, Backbone, Host, NetInterface, Protocol};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "advertiser")]
#[command(about = "Advertise a DNS-SD service on the local network", long_about = None)]
struct Args {
    /// Hostname label to claim, advertised as <hostname>.local
    #[arg(long, default_value = "dotlocal")]
    hostname: String,

    /// Service type, with or without the leading underscore
    #[arg(short, long, default_value = "http")]
    service: String,

    /// Advertise the service over UDP instead of TCP
    #[arg(long)]
    udp: bool,

    /// Port the advertised service listens on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Instance name; defaults to the hostname
    #[arg(long)]
    instance: Option<String>,

    /// TXT item as key=value; repeatable
    #[arg(long = "txt", value_name = "KEY=VALUE")]
    txt: Vec<String>,

    /// Pin to one network interface by OS name
    #[arg(long)]
    iface: Option<String>,

    /// mDNS port (5353 for production, custom port like 5454 for development next to a system responder)
    #[arg(long, default_value_t = 5353)]
    mdns_port: u16,

    /// Also browse for peers offering the same service type
    #[arg(long)]
    browse: bool,

    /// Stop after this many seconds (0 runs until interrupted)
    #[arg(long, default_value_t = 0)]
    run_secs: u64,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    println!();
    println!("{}", "=== dotlocal mDNS Advertiser ===".bright_cyan().bold());
    println!("{}: {}", "Host".bright_white(), args.hostname.bright_white());
    println!(
        "{}: {}",
        "Service".bright_white(),
        args.service.bright_white()
    );
    println!("{}: {}", "Port".bright_white(), args.port);
    println!();

    match run(&args) {
        Ok(()) => {
            println!();
            println!("OK: Advertiser stopped");
            Ok(())
        }
        Err(e) => {
            println!();
            error!("Advertiser failed: {:?}", e);
            println!("FAIL: {e:?}");
            std::process::exit(1);
        }
    }
}

/// Run the advertiser until the deadline or forever
fn run(args: &Args) -> Result<()> {
    let protocol = if args.udp { Protocol::Udp } else { Protocol::Tcp };

    let iface: Rc<dyn NetInterface> = Rc::new(match &args.iface {
        Some(name) => SystemInterface::named(name),
        None => SystemInterface::new(),
    });
    let backbone = Rc::new(Backbone::new(Box::new(UdpTransport::with_port(
        args.mdns_port,
    ))));
    let mut host = Host::new(
        backbone,
        iface,
        Rc::new(HickoryCodec),
        Rc::new(SystemClock::new()),
    );

    // The callback goes in before begin so the very first claim reports.
    host.set_probe_callback(Some(Box::new(|name, claimed| {
        if claimed {
            info!("hostname '{}' claimed", name);
            println!(
                "OK: Hostname claimed: {}",
                format!("{name}.local").bright_white()
            );
        } else {
            info!("hostname conflict, renamed to '{}'", name);
            println!(
                "WAIT: Conflict, renamed to {}",
                format!("{name}.local").bright_white()
            );
        }
    })));

    println!("WAIT: Opening mDNS socket...");
    host.begin(&args.hostname)
        .context("Failed to start the responder")?;
    println!("OK: Socket open, probing for the hostname");

    let service = host
        .add_service(args.instance.as_deref(), &args.service, protocol, args.port)
        .context("Failed to add the service")?;
    for item in &args.txt {
        let (key, value) = item
            .split_once('=')
            .with_context(|| format!("TXT item '{item}' is not key=value"))?;
        host.service_mut(service)
            .context("Service disappeared")?
            .set_txt(key, value)
            .with_context(|| format!("Invalid TXT item '{item}'"))?;
    }
    host.set_service_probe_callback(
        service,
        Some(Box::new(|name, claimed| {
            if claimed {
                println!("OK: Service claimed: {}", name.bright_white());
            } else {
                println!("WAIT: Service conflict, renamed to {}", name.bright_white());
            }
        })),
    )
    .context("Service disappeared")?;

    if args.browse {
        host.install_service_query(
            &args.service,
            protocol,
            Some(Box::new(|answer: &Answer| {
                println!(
                    "  {} {:?}",
                    answer.record.name.to_string().bright_white(),
                    answer.record.data
                );
            })),
            None,
        )
        .context("Failed to install the browse query")?;
        println!("OK: Browsing for peers");
    }

    println!();
    println!("{}", "Advertising... press Ctrl-C to stop".bright_cyan());
    println!();

    let deadline =
        (args.run_secs > 0).then(|| Instant::now() + Duration::from_secs(args.run_secs));
    loop {
        host.update();
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }
        thread::sleep(Duration::from_millis(50));
    }

    // Goodbye records go out for everything that was claimed.
    host.close();
    Ok(())
}
