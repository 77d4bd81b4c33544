// Copyright (c) 2023 Mike Tsao. All rights reserved.

use chartforge_core::traits::Clock;
use chartforge_engine::{
    session::{Command, Session, SessionEvent},
    transport::{OfflineClock, SimulatedTransport},
};
use chartforge_settings::ChartSettings;
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Chart file to load (YAML)
    chart: String,

    /// Repair structural inconsistencies before running
    #[clap(long, value_parser)]
    fix: bool,

    /// Loop the given section for the whole run
    #[clap(long, value_parser)]
    loop_section: Option<usize>,

    /// Loop the phrase with the given id for the whole run
    #[clap(long, value_parser)]
    loop_phrase: Option<usize>,

    /// How many scheduler polls to simulate
    #[clap(long, value_parser, default_value_t = 1000)]
    ticks: usize,

    /// Simulated seconds between polls
    #[clap(long, value_parser, default_value_t = 0.01)]
    tick_seconds: f64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let settings = ChartSettings::new_from_yaml_file(&args.chart)?;
    let editor = settings.instantiate()?;
    let duration = editor.structure().duration_seconds;

    let mut clock = OfflineClock::new_with(args.tick_seconds);
    let (mut session, _impacts) = Session::new_with(editor, SimulatedTransport::new_with(duration));

    if args.fix {
        session.enqueue(Command::FixInconsistencies);
    }
    session.enqueue(Command::Play);
    if let Some(section) = args.loop_section {
        session.enqueue(Command::LoopSection(section));
    }
    if let Some(phrase_id) = args.loop_phrase {
        session.enqueue(Command::LoopPhrase(phrase_id));
    }

    let mut commits = 0;
    for _ in 0..args.ticks {
        let now = clock.now();
        session.transport_mut().advance(clock.tick_seconds(), now);
        for event in session.tick(now) {
            match event {
                SessionEvent::LoopCommitted(commit) => {
                    commits += 1;
                    println!(
                        "loop commit #{commits} at {:.3}s, deck {} now active",
                        commit.at, commit.now_active
                    );
                }
                event => println!("{event:?}"),
            }
        }
        clock.advance();
    }

    let structure = session.editor().structure();
    println!(
        "{}: {:.1}s, {} section(s), {} phrase(s), {} loop commit(s)",
        settings.title.as_deref().unwrap_or("chart"),
        structure.duration_seconds,
        structure.sections.len(),
        structure.phrase_count(),
        commits
    );
    for section in &structure.sections {
        println!(
            "  {} [{:.3}s..{:.3}s)",
            section.name,
            section.start_time(),
            section.end_time()
        );
        for phrase in &section.phrases {
            println!(
                "    #{} {} [{:.3}s..{:.3}s) {} bar(s) @ {:.1} BPM",
                phrase.phrase_id,
                phrase.name,
                phrase.start_time,
                phrase.end_time(),
                phrase.duration_bars,
                phrase.bpm
            );
        }
    }

    Ok(())
}
