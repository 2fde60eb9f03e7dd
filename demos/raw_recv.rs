use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;
use std::{env, process};

use getopts::{Matches, Options};
use rand::Rng;

use rawip::api::{self, Error};
use rawip::context::{self, ExecContext};
use rawip::iface::{Config, Ip};
use rawip::pkbuf::{PacketBuffer, PacketPool};
use rawip::time::Duration;
use rawip::wait::WaitOption;

const PAYLOAD_SIZE: usize = 256;
const RESERVE: usize = 16;

fn setup_logging(filter: &str) {
    env_logger::Builder::new()
        .parse_filters(&env::var("RUST_LOG").unwrap_or_else(|_| filter.to_owned()))
        .format_timestamp_millis()
        .init();
}

fn create_options() -> Options {
    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt("c", "count", "datagrams to inject (default 10)", "COUNT");
    opts.optopt("i", "interval", "milliseconds between datagrams (default 20)", "MS");
    opts.optopt("x", "corrupt-every", "corrupt every Nth datagram (default 4, 0 = never)", "N");
    opts.optopt("w", "wait", "receive wait: none, forever or milliseconds (default 500)", "WAIT");
    opts.optopt("l", "log", "log filter (default info)", "FILTER");
    opts
}

fn parse_options(opts: &Options) -> Matches {
    let args: Vec<String> = env::args().skip(1).collect();
    let matches = match opts.parse(&args) {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("{err}");
            process::exit(1)
        }
    };
    if matches.opt_present("h") {
        print!("{}", opts.usage("Usage: raw_recv [options]"));
        process::exit(0)
    }
    matches
}

fn number<T: std::str::FromStr>(matches: &Matches, name: &str, default: T) -> T {
    match matches.opt_str(name) {
        Some(value) => value.parse().unwrap_or_else(|_| {
            eprintln!("invalid value for --{name}: {value}");
            process::exit(1)
        }),
        None => default,
    }
}

fn parse_wait(matches: &Matches) -> WaitOption {
    match matches.opt_str("wait").as_deref() {
        Some("none") => WaitOption::NoWait,
        Some("forever") => WaitOption::Forever,
        Some(millis) => match millis.parse() {
            Ok(millis) => WaitOption::Timeout(Duration::from_millis(millis)),
            Err(_) => {
                eprintln!("invalid value for --wait: {millis}");
                process::exit(1)
            }
        },
        None => WaitOption::Timeout(Duration::from_millis(500)),
    }
}

/// An ICMP echo request carrying `seq`, starting at its IPv4 header.
fn datagram(pool: &Arc<PacketPool>, seq: u16) -> Option<PacketBuffer> {
    let mut pkbuf = pool.allocate(RESERVE).ok()?;
    let mut bytes = [0u8; 28];
    bytes[0] = 0x45;
    bytes[2..4].copy_from_slice(&28u16.to_be_bytes());
    bytes[8] = 64;
    bytes[9] = 1;
    bytes[12..16].copy_from_slice(&[192, 168, 69, 100]);
    bytes[16..20].copy_from_slice(&[192, 168, 69, 1]);
    bytes[20] = 8;
    bytes[26..28].copy_from_slice(&seq.to_be_bytes());
    pkbuf.append_data(&bytes).ok()?;
    Some(pkbuf)
}

fn main() {
    let opts = create_options();
    let matches = parse_options(&opts);
    setup_logging(&matches.opt_str("log").unwrap_or_else(|| "info".to_owned()));

    let count: u16 = number(&matches, "count", 10);
    let interval: u64 = number(&matches, "interval", 20);
    let corrupt_every: u16 = number(&matches, "corrupt-every", 4);
    let wait = parse_wait(&matches);

    let pool = PacketPool::new(32, PAYLOAD_SIZE);
    let ip = {
        let _init = context::enter(ExecContext::Initialize);
        let mut config = Config::new();
        config.raw_queue_max = 16;
        let storage: Vec<Option<PacketBuffer>> = (0..16).map(|_| None).collect();
        let ip = Ip::new(config, storage);
        if let Err(err) = api::raw_packet_enable(Some(&ip)) {
            eprintln!("enable failed: {err}");
            process::exit(1)
        }
        ip
    };

    thread::scope(|s| {
        s.spawn(|| {
            let _isr = context::enter(ExecContext::Interrupt);
            let mut rng = rand::thread_rng();
            for seq in 1..=count {
                thread::sleep(StdDuration::from_millis(interval));
                let Some(mut pkbuf) = datagram(&pool, seq) else {
                    log::warn!("pool exhausted at seq {seq}");
                    continue;
                };
                if corrupt_every != 0 && seq % corrupt_every == 0 {
                    let end = pkbuf.data_end();
                    pkbuf.set_window_unchecked(pkbuf.prepend(), end + rng.gen_range(1..64));
                }
                match ip.raw_in(pkbuf) {
                    Ok(delivery) => log::debug!("seq {seq}: {delivery:?}"),
                    Err(_) => log::warn!("seq {seq}: not taken by the raw path"),
                }
            }
        });

        let mut received = 0;
        loop {
            match api::raw_packet_receive(Some(&ip), wait) {
                Ok(pkbuf) => {
                    received += 1;
                    let payload = pkbuf.payload();
                    let seq = u16::from_be_bytes([payload[6], payload[7]]);
                    println!("received icmp seq={seq} len={}", payload.len());
                    pool.release(pkbuf);
                }
                Err(Error::NoPacket) => {
                    println!("no packet within {wait:?}");
                    break;
                }
                Err(err) => {
                    eprintln!("receive failed: {err}");
                    break;
                }
            }
        }
        println!("{received} datagrams received");
    });

    let stats = ip.raw_stats();
    println!(
        "raw: received={} handed_off={} dropped={} invalid_released={} delivered={}",
        stats.received, stats.handed_off, stats.dropped, stats.invalid_released, stats.delivered
    );
    ip.delete();
    let pool_stats = pool.stats();
    println!(
        "pool: allocated={} released={} free={}/{}",
        pool_stats.allocated, pool_stats.released, pool_stats.free, pool_stats.total
    );
}
