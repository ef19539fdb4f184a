use anyhow::Result;
use log::info;

use flirt_sigtree::{pat, Config, DumpContext, SignatureTreeBuilder};

fn run(pat_paths: &[&str], config: Config, dump: bool) -> Result<()> {
    let mut builder = SignatureTreeBuilder::new(config);

    for pat_path in pat_paths.iter() {
        let buf = String::from_utf8(std::fs::read(pat_path)?)?;
        let modules = pat::parse(&buf, builder.config())?;
        let report = builder.load(modules);
        info!("{pat_path}: {report}");
    }

    let tree = builder.build();
    println!("{}", tree.stats());

    if dump {
        print!("{}", tree.dump(&DumpContext::default()));
    }

    Ok(())
}

fn main() {
    better_panic::install();

    let matches = clap::App::new("pat2tree")
        .about("load .pat files into a signature tree and report on its shape")
        .arg(
            clap::Arg::new("verbose")
                .short('v')
                .long("verbose")
                .multiple_occurrences(true)
                .help("log verbose messages"),
        )
        .arg(clap::Arg::new("dump").short('d').long("dump").help("print every node of the tree"))
        .arg(
            clap::Arg::new("pat")
                .required(true)
                .multiple_values(true)
                .index(1)
                .help("path to .pat file"),
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

    let pat_paths: Vec<&str> = matches.values_of("pat").unwrap().collect();

    if let Err(e) = run(&pat_paths, Config::default(), matches.is_present("dump")) {
        eprintln!("error: {e:}");
    }
}
