use std::collections::BTreeSet;

use anyhow::Result;
use log::debug;

use flirt_sigtree::{pat, Config, MatchResult, Pattern, SigElement, SignatureTreeBuilder};

/// split a window like `E8........C3` into bytes and relocation hints.
fn parse_window(s: &str) -> Result<(Vec<u8>, BTreeSet<usize>)> {
    let pattern: Pattern = s.parse()?;

    let mut bytes = Vec::with_capacity(pattern.len());
    let mut hints: BTreeSet<usize> = Default::default();
    for (i, elem) in pattern.0.iter().enumerate() {
        match elem {
            SigElement::Byte(b) => bytes.push(*b),
            SigElement::Wildcard => {
                bytes.push(0x00);
                hints.insert(i);
            }
        }
    }

    Ok((bytes, hints))
}

fn run(pat_path: &str, window: &str) -> Result<()> {
    let config = Config::default();
    let buf = String::from_utf8(std::fs::read(pat_path)?)?;

    let mut builder = SignatureTreeBuilder::new(config.clone());
    let report = builder.load(pat::parse(&buf, &config)?);
    debug!("{pat_path}: {report}");
    let tree = builder.build();

    let (bytes, hints) = parse_window(window)?;
    match tree.r#match(&bytes, &hints) {
        MatchResult::None => println!("no match"),
        MatchResult::Unique(m) => println!("{m}"),
        MatchResult::Ambiguous(ms) => {
            println!("ambiguous: {} candidates", ms.len());
            for m in ms.iter() {
                println!("  {m}");
            }
        }
    }

    Ok(())
}

fn main() {
    better_panic::install();

    let matches = clap::App::new("matchsig")
        .about("match a function body against the signatures in a .pat file")
        .arg(
            clap::Arg::new("verbose")
                .short('v')
                .long("verbose")
                .multiple_occurrences(true)
                .help("log verbose messages"),
        )
        .arg(clap::Arg::new("pat").required(true).index(1).help("path to .pat file"))
        .arg(
            clap::Arg::new("window")
                .required(true)
                .index(2)
                .help("function bytes as hex, with `..` for relocated bytes"),
        )
        .get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        2 => log::LevelFilter::Trace,
        _ => log::LevelFilter::Trace,
    };

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{:5}] {} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                if log_level == log::LevelFilter::Trace {
                    record.target()
                } else {
                    ""
                },
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()
        .expect("failed to configure logging");

    if let Err(e) = run(matches.value_of("pat").unwrap(), matches.value_of("window").unwrap()) {
        eprintln!("error: {e:}");
    }
}
