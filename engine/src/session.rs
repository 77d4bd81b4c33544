// Copyright (c) 2023 Mike Tsao. All rights reserved.

use crate::{
    capture::{CaptureEngine, CaptureError, CaptureOutcome, Limb},
    editor::StructureEditor,
    looper::{LoopCommit, LoopScheduler, SchedulingError},
};
use chartforge_core::{structure::Segment, traits::Transport, ParameterType, StructureError};
use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;

/// A control-surface request. Commands queue up between ticks and are applied
/// in arrival order at the top of the next tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Play,
    Stop,
    Seek(ParameterType),
    AddSectionHere,
    AddPhraseHere,
    ConvertPhraseIntoSection(usize),
    MoveToPrevSection(usize),
    MoveToNextSection(usize),
    DeleteSection(usize),
    DeletePhrase(usize),
    LoopSection(usize),
    LoopPhrase(usize),
    DisableLoop,
    FixInconsistencies,
}

/// A raw tap from an input device, delivered over the impact channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Impact {
    pub limb: Limb,
}

/// What happened during a tick, in occurrence order.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Captured(CaptureOutcome),
    CaptureFailed(CaptureError),
    EditFailed(StructureError),
    LoopCommitted(LoopCommit),
    LoopFailed(SchedulingError),
}

/// [Session] owns one chart-editing run: the editor, the capture engine, the
/// loop scheduler, and the transport they all act on. Everything advances
/// from a single `tick()`, so there is exactly one writer per tick and no
/// locking anywhere.
#[derive(Debug)]
pub struct Session<T: Transport> {
    editor: StructureEditor,
    capture: CaptureEngine,
    looper: LoopScheduler,
    transport: T,
    pending_commands: VecDeque<Command>,
    impacts: Receiver<Impact>,
}
impl<T: Transport> Session<T> {
    /// Returns the session and the sender that input devices push [Impact]s
    /// into.
    pub fn new_with(editor: StructureEditor, transport: T) -> (Self, Sender<Impact>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (
            Self {
                editor,
                capture: CaptureEngine::new(),
                looper: LoopScheduler::new(),
                transport,
                pending_commands: VecDeque::default(),
                impacts: receiver,
            },
            sender,
        )
    }

    pub fn editor(&self) -> &StructureEditor {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut StructureEditor {
        &mut self.editor
    }

    pub fn capture(&self) -> &CaptureEngine {
        &self.capture
    }

    pub fn looper(&self) -> &LoopScheduler {
        &self.looper
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn enqueue(&mut self, command: Command) {
        self.pending_commands.push_back(command);
    }

    /// Advances the session by one poll: queued commands first, then at most
    /// one pending impact, then the loop scheduler.
    pub fn tick(&mut self, clock_now: ParameterType) -> Vec<SessionEvent> {
        let mut events = Vec::default();

        while let Some(command) = self.pending_commands.pop_front() {
            self.apply(command, clock_now, &mut events);
        }

        // One impact per tick keeps capture ordering deterministic even when
        // a device floods the channel.
        if let Ok(impact) = self.impacts.try_recv() {
            match self
                .capture
                .record_impact(impact.limb, &self.transport, self.editor.structure())
            {
                Ok(outcome) => events.push(SessionEvent::Captured(outcome)),
                Err(e) => {
                    log::warn!("capture dropped a {} impact: {e}", impact.limb);
                    events.push(SessionEvent::CaptureFailed(e));
                }
            }
        }

        if let Some(commit) = self.looper.tick(&mut self.transport, clock_now) {
            events.push(SessionEvent::LoopCommitted(commit));
        }

        events
    }

    fn apply(&mut self, command: Command, clock_now: ParameterType, events: &mut Vec<SessionEvent>) {
        match command {
            Command::Play => self.transport.play(),
            Command::Stop => {
                // Cancel any armed schedules before the transport forgets
                // about its decks.
                self.looper.disable(&mut self.transport);
                self.transport.stop();
            }
            Command::Seek(t) => self.transport.seek(t),
            Command::AddSectionHere => {
                let t = self.transport.position();
                self.push_edit(self.editor.structure().clone(), events, |editor| {
                    editor.add_section(t).map(|_| ())
                });
            }
            Command::AddPhraseHere => {
                let t = self.transport.position();
                let section = self.editor.structure().find_section_at(t);
                match section {
                    Ok(si) => self.push_edit(self.editor.structure().clone(), events, |editor| {
                        editor.add_phrase(si, t).map(|_| ())
                    }),
                    Err(e) => {
                        log::warn!("no section at {t}: {e}");
                        events.push(SessionEvent::EditFailed(e));
                    }
                }
            }
            Command::ConvertPhraseIntoSection(phrase_id) => {
                self.push_edit(self.editor.structure().clone(), events, |editor| {
                    editor.convert_phrase_into_section(phrase_id).map(|_| ())
                });
            }
            Command::MoveToPrevSection(phrase_id) => {
                self.push_edit(self.editor.structure().clone(), events, |editor| {
                    editor.move_to_prev_section(phrase_id)
                });
            }
            Command::MoveToNextSection(phrase_id) => {
                self.push_edit(self.editor.structure().clone(), events, |editor| {
                    editor.move_to_next_section(phrase_id)
                });
            }
            Command::DeleteSection(index) => {
                self.push_edit(self.editor.structure().clone(), events, |editor| {
                    editor.delete_section(index)
                });
            }
            Command::DeletePhrase(phrase_id) => {
                self.push_edit(self.editor.structure().clone(), events, |editor| {
                    editor.delete_phrase(phrase_id)
                });
            }
            Command::LoopSection(index) => {
                self.start_loop(Segment::Section(index), clock_now, events);
            }
            Command::LoopPhrase(phrase_id) => {
                match self.editor.structure().locate(phrase_id) {
                    Some((section, phrase)) => {
                        self.start_loop(Segment::Phrase { section, phrase }, clock_now, events)
                    }
                    None => {
                        log::warn!("no phrase with id {phrase_id}");
                        events.push(SessionEvent::EditFailed(StructureError::NotFound));
                    }
                }
            }
            Command::DisableLoop => self.looper.disable(&mut self.transport),
            Command::FixInconsistencies => {
                self.push_edit(self.editor.structure().clone(), events, |editor| {
                    editor.fix_inconsistencies()
                });
            }
        }
    }

    /// Runs one edit; a failed edit rolls the structure back wholesale so a
    /// half-applied operation can never leak out.
    fn push_edit<F>(
        &mut self,
        before: chartforge_core::structure::SongStructure,
        events: &mut Vec<SessionEvent>,
        edit: F,
    ) where
        F: FnOnce(&mut StructureEditor) -> Result<(), StructureError>,
    {
        if let Err(e) = edit(&mut self.editor) {
            log::warn!("edit failed, structure unchanged: {e}");
            self.editor.replace_structure(before);
            events.push(SessionEvent::EditFailed(e));
        }
    }

    fn start_loop(
        &mut self,
        segment: Segment,
        clock_now: ParameterType,
        events: &mut Vec<SessionEvent>,
    ) {
        match self.editor.structure().span(segment) {
            Ok(span) => {
                if let Err(e) = self.looper.retarget(span, &mut self.transport, clock_now) {
                    log::warn!("loop request refused: {e}");
                    events.push(SessionEvent::LoopFailed(e));
                }
            }
            Err(e) => {
                log::warn!("loop target does not exist: {e}");
                events.push(SessionEvent::EditFailed(e));
            }
        }
    }
}
