// Copyright (c) 2023 Mike Tsao. All rights reserved.

use chartforge_core::{
    structure::SongStructure,
    time::TimeSignature,
    traits::{Clock, Transport},
};
use chartforge_engine::{
    editor::StructureEditor,
    session::{Command, Session, SessionEvent},
    transport::{OfflineClock, SimulatedTransport},
};
use float_cmp::approx_eq;
use more_asserts::assert_ge;

#[test]
fn a_long_looping_run_accumulates_no_drift() {
    // Loop a 2.5-second section for hundreds of cycles with a coarse,
    // non-divisible poll interval. Every commit must land on an exact
    // multiple of the loop length even though every poll is late.
    let mut structure =
        SongStructure::new_spanning(120.0, 120.0, TimeSignature::default()).unwrap();
    structure.keep_tempo = false;
    let mut editor = StructureEditor::new_with(structure);
    editor.add_section(2.5).unwrap();

    let transport = SimulatedTransport::new_with(120.0);
    let (mut session, _impacts) = Session::new_with(editor, transport);
    session.enqueue(Command::Play);
    session.enqueue(Command::LoopSection(0));

    let mut clock = OfflineClock::new_with(0.31);
    let mut commit_times = Vec::default();
    for _ in 0..1500 {
        let now = clock.now();
        session.transport_mut().advance(clock.tick_seconds(), now);
        for event in session.tick(now) {
            if let SessionEvent::LoopCommitted(commit) = event {
                commit_times.push(commit.at);
            }
        }
        clock.advance();
    }

    assert_ge!(commit_times.len(), 150);
    for (i, at) in commit_times.iter().enumerate() {
        let expected = 2.5 * (i as f64 + 1.0);
        assert!(
            approx_eq!(f64, *at, expected, epsilon = 1e-9),
            "commit {i} at {at}, expected {expected}"
        );
    }
}

#[test]
fn retargeting_mid_loop_switches_spans_without_a_glitch() {
    let structure = SongStructure::new_spanning(60.0, 120.0, TimeSignature::default()).unwrap();
    let mut editor = StructureEditor::new_with(structure);
    editor.add_section(10.0).unwrap();
    editor.add_section(20.0).unwrap();

    let transport = SimulatedTransport::new_with(60.0);
    let (mut session, _impacts) = Session::new_with(editor, transport);
    session.enqueue(Command::Play);
    session.enqueue(Command::LoopSection(0));

    // Partway toward section 0's boundary, point the armed deck at section 1
    // instead. The swap then happens at section 1's end boundary, not
    // section 0's.
    let mut clock = OfflineClock::new_with(0.25);
    let mut first_commit = None;
    while first_commit.is_none() {
        let now = clock.now();
        session.transport_mut().advance(clock.tick_seconds(), now);
        if now >= 5.0 && now < 5.25 {
            session.enqueue(Command::LoopSection(1));
        }
        for event in session.tick(now) {
            if let SessionEvent::LoopCommitted(commit) = event {
                first_commit = Some(commit.at);
            }
        }
        clock.advance();
    }
    assert!(approx_eq!(f64, first_commit.unwrap(), 20.0, epsilon = 1e-6));
    // After the commit the position sits inside the new loop's window.
    let position = session.transport().position();
    assert_ge!(position, 10.0);
}

#[test]
fn disabling_a_loop_keeps_playback_running() {
    let structure = SongStructure::new_spanning(60.0, 120.0, TimeSignature::default()).unwrap();
    let editor = StructureEditor::new_with(structure);
    let (mut session, _impacts) = Session::new_with(editor, SimulatedTransport::new_with(60.0));
    session.enqueue(Command::Play);
    session.enqueue(Command::LoopSection(0));
    session.tick(0.0);
    assert!(session.looper().armed_deadline().is_some());

    session.enqueue(Command::DisableLoop);
    session.tick(0.5);
    assert!(session.looper().armed_deadline().is_none());
    assert!(session.transport().is_playing());
}
