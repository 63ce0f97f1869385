//! App - owns the engine and drives its clock
//!
//! Keyboard input is read on its own thread and turned into
//! [`SynthMessage`]s, which reach the engine through a ring buffer. The
//! main loop advances the recording backend's clock from wall time, lets
//! the engine run whatever is due and redraws.

use std::io::stdout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use color_eyre::eyre::{eyre, Result as EyreResult};
use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::{execute, terminal};
use log::{info, warn};
use ratatui::DefaultTerminal;
use rtrb::{Consumer, Producer, RingBuffer};

use polyvoice::{
    engine::scheduler::Scheduler,
    io::keyboard::note_for_key,
    synth::{
        filter::{MAX_CUTOFF, MIN_CUTOFF},
        message::{ParamChange, SynthMessage},
        modulation::ModulationTarget,
    },
    NoteId, RecordingBackend, SynthConfig, SynthEngine,
};

use super::ui;

const QUEUE_SIZE: usize = 256;
const FRAME: Duration = Duration::from_millis(16);
const INPUT_POLL: Duration = Duration::from_millis(5);
/// How long a key "holds" when the terminal can't report key releases
const AUTO_RELEASE: f64 = 0.4;
const VELOCITY: u8 = 100;
const CUTOFF_STEP: f32 = 1.25;
/// Left/Right sweep the live cutoff by this factor; Up/Down return to the stored one
const SWEEP_FACTOR: f32 = 2.0;

pub struct App {
    engine: SynthEngine<RecordingBackend>,
    messages: Consumer<SynthMessage>,
    producer: Option<Producer<SynthMessage>>,
    quit: Arc<AtomicBool>,
    started: Instant,
    held: AutoRelease,
}

impl App {
    pub fn new(config: SynthConfig) -> EyreResult<Self> {
        let engine = SynthEngine::with_config(RecordingBackend::new(), config)
            .map_err(|err| eyre!("invalid synth config: {}", err))?;
        let (producer, messages) = RingBuffer::new(QUEUE_SIZE);

        Ok(Self {
            engine,
            messages,
            producer: Some(producer),
            quit: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
            held: AutoRelease::default(),
        })
    }

    /// Run until Esc is pressed (takes over the terminal)
    pub fn run(mut self) -> EyreResult<()> {
        let releases = terminal::supports_keyboard_enhancement().unwrap_or(false);
        let mut terminal = ratatui::init();
        if releases {
            execute!(
                stdout(),
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
            )?;
        }
        info!("key release events {}", if releases { "available" } else { "unavailable" });

        let result = self.run_loop(&mut terminal, releases);

        if releases {
            if let Err(err) = execute!(stdout(), PopKeyboardEnhancementFlags) {
                warn!("could not restore keyboard flags: {}", err);
            }
        }
        ratatui::restore();
        self.engine.power_off();
        result
    }

    fn run_loop(&mut self, terminal: &mut DefaultTerminal, releases: bool) -> EyreResult<()> {
        let producer = self
            .producer
            .take()
            .ok_or_else(|| eyre!("input thread already started"))?;
        let input = spawn_input(producer, self.quit.clone());

        while !self.quit.load(Ordering::Relaxed) {
            let now = self.started.elapsed().as_secs_f64();
            self.engine.backend_mut().set_time(now);

            if releases {
                self.engine.process_messages(&mut self.messages);
            } else {
                self.drain_with_auto_release(now);
            }
            self.engine.poll();
            // nothing reads these here; keep the buffer from growing
            self.engine.drain_events();

            terminal.draw(|frame| ui::render(frame, &self.engine, releases))?;
            thread::sleep(FRAME);
        }

        input
            .join()
            .map_err(|_| eyre!("input thread panicked"))?
    }

    fn drain_with_auto_release(&mut self, now: f64) {
        while let Ok(message) = self.messages.pop() {
            self.engine.handle_message(message);
            if let SynthMessage::NoteOn { note, .. } = message {
                self.held.hold(&self.engine, note, now);
            }
        }
        self.held.release_due(&mut self.engine, now);
    }
}

/// Pending note-offs for terminals without release events.
///
/// Each release is tied to the entry generation it was scheduled for, so
/// a stale release never cuts a retriggered note short.
#[derive(Default)]
struct AutoRelease {
    pending: Scheduler<(NoteId, u64)>,
}

impl AutoRelease {
    fn hold(&mut self, engine: &SynthEngine<RecordingBackend>, note: NoteId, now: f64) {
        if let Some(entry) = engine.voices().entry(note) {
            self.pending
                .schedule(now + AUTO_RELEASE, (note, entry.generation()));
        }
    }

    fn release_due(&mut self, engine: &mut SynthEngine<RecordingBackend>, now: f64) -> usize {
        let mut released = 0;
        while let Some((_, (note, generation))) = self.pending.pop_due(now) {
            let current = engine.voices().entry(note).map(|entry| entry.generation());
            if current == Some(generation) && engine.note_off(note) {
                released += 1;
            }
        }
        released
    }
}

fn spawn_input(
    mut producer: Producer<SynthMessage>,
    quit: Arc<AtomicBool>,
) -> JoinHandle<EyreResult<()>> {
    let flag = quit.clone();
    spawn_until_quit(quit, move || read_input(&mut producer, &flag))
}

/// Run `body` on its own thread and raise `quit` however it ends; the main
/// loop only watches the flag.
fn spawn_until_quit<F>(quit: Arc<AtomicBool>, body: F) -> JoinHandle<EyreResult<()>>
where
    F: FnOnce() -> EyreResult<()> + Send + 'static,
{
    thread::spawn(move || {
        let result = body();
        quit.store(true, Ordering::Relaxed);
        result
    })
}

fn read_input(producer: &mut Producer<SynthMessage>, quit: &AtomicBool) -> EyreResult<()> {
    let mut cutoff = SynthConfig::default().filter.cutoff;

    while !quit.load(Ordering::Relaxed) {
        if !event::poll(INPUT_POLL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.code == KeyCode::Esc {
            break;
        }
        if let Some(message) = message_for_key(key, &mut cutoff) {
            if producer.push(message).is_err() {
                warn!("input queue full, dropping {:?}", message);
            }
        }
    }
    Ok(())
}

fn message_for_key(key: KeyEvent, cutoff: &mut f32) -> Option<SynthMessage> {
    match key.kind {
        // auto-repeat would retrigger held notes
        KeyEventKind::Repeat => None,
        KeyEventKind::Release => match key.code {
            KeyCode::Char(c) => note_for_key(c).map(|note| SynthMessage::NoteOff { note }),
            _ => None,
        },
        KeyEventKind::Press => match key.code {
            KeyCode::Char(' ') => Some(SynthMessage::PowerToggle),
            KeyCode::Char('1') => Some(SynthMessage::SetParam(ParamChange::LfoTarget(
                ModulationTarget::FilterCutoff,
            ))),
            KeyCode::Char('0') => Some(SynthMessage::SetParam(ParamChange::LfoTarget(
                ModulationTarget::Amplitude,
            ))),
            KeyCode::Up | KeyCode::Down => {
                let next = if key.code == KeyCode::Up {
                    *cutoff * CUTOFF_STEP
                } else {
                    *cutoff / CUTOFF_STEP
                };
                *cutoff = next.clamp(MIN_CUTOFF, MAX_CUTOFF);
                Some(SynthMessage::SetParam(ParamChange::FilterCutoff(*cutoff)))
            }
            KeyCode::Left => Some(SynthMessage::SetParam(ParamChange::FilterModulation(
                1.0 / SWEEP_FACTOR,
            ))),
            KeyCode::Right => Some(SynthMessage::SetParam(ParamChange::FilterModulation(
                SWEEP_FACTOR,
            ))),
            KeyCode::Char(c) => note_for_key(c).map(|note| SynthMessage::NoteOn {
                note,
                velocity: VELOCITY,
            }),
            _ => None,
        },
    }
}
