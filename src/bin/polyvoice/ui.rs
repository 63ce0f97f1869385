//! Status view: power, modulation routing and every live note's envelope

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use polyvoice::{
    dsp::{
        lfo::period_from_frequency,
        oscillator::{cents_to_ratio, gain_to_db},
    },
    synth::poly::{NoteEntry, NoteState},
    AudioBackend, PowerState, RecordingBackend, SynthEngine,
};

const METER_WIDTH: usize = 30;

pub fn render(frame: &mut Frame, engine: &SynthEngine<RecordingBackend>, releases: bool) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Status bar
            Constraint::Min(6),    // Notes
            Constraint::Length(1), // Help bar
        ])
        .split(frame.area());

    render_status(frame, chunks[0], engine);
    render_notes(frame, chunks[1], engine);

    let mut help = String::from(" [Esc] Quit  [Space] Power  [1] LFO->filter  [0] LFO->amp  [Up/Down] Cutoff  [Left/Right] Sweep");
    if !releases {
        help.push_str("  (no key release events: notes auto-release)");
    }
    let help = Paragraph::new(help).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, chunks[2]);
}

fn render_status(frame: &mut Frame, area: Rect, engine: &SynthEngine<RecordingBackend>) {
    let block = Block::default().title(" polyvoice ").borders(Borders::ALL);

    let (power, power_color) = match engine.power() {
        PowerState::On => ("ON ", Color::Green),
        PowerState::Off => ("OFF", Color::Red),
    };
    let target = engine
        .route()
        .map(|route| route.target.name())
        .unwrap_or("-");
    let config = engine.config();

    let line = Line::from(vec![
        Span::styled(format!(" Power: {}  ", power), Style::default().fg(power_color)),
        Span::styled(
            format!(
                "LFO: {} {:.0}ms  ",
                target,
                period_from_frequency(config.lfo.frequency) * 1000.0
            ),
            Style::default().fg(Color::Cyan),
        ),
        Span::styled(
            format!("Cutoff: {:.0}Hz  ", config.filter.cutoff),
            Style::default().fg(Color::Yellow),
        ),
        Span::raw(format!(
            "Voices: {} (+{} fading)  t={:.2}s",
            engine.voices().len(),
            engine.voices().retiring_count(),
            engine.backend().now()
        )),
    ]);

    frame.render_widget(Paragraph::new(line).block(block), area);
}

fn render_notes(frame: &mut Frame, area: Rect, engine: &SynthEngine<RecordingBackend>) {
    let block = Block::default().title(" Notes ").borders(Borders::ALL);
    let now = engine.backend().now();

    let mut entries: Vec<&NoteEntry> = engine.voices().entries().collect();
    entries.sort_by_key(|entry| entry.note());

    let lines: Vec<Line> = entries
        .into_iter()
        .map(|entry| note_line(entry, now))
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn note_line(entry: &NoteEntry, now: f64) -> Line<'static> {
    let level = entry.envelope().value(now).clamp(0.0, 1.0);
    let filled = (level * METER_WIDTH as f32).round() as usize;
    let meter = format!("{}{}", "#".repeat(filled), ".".repeat(METER_WIDTH - filled));

    let level_db = if level > 0.0 {
        format!("{:>6.1}dB ", gain_to_db(level))
    } else {
        String::from("  -inf dB ")
    };
    let detuned: Vec<String> = entry
        .voices()
        .iter()
        .map(|voice| {
            let ratio = cents_to_ratio(voice.settings().detune_cents) as f64;
            format!("{:.1}", entry.frequency() * ratio)
        })
        .collect();

    let color = match entry.state() {
        NoteState::Scheduled => Color::DarkGray,
        NoteState::Sounding => Color::Green,
        NoteState::Releasing => Color::Yellow,
        NoteState::Cleanup | NoteState::Removed => Color::Red,
    };

    Line::from(vec![
        Span::raw(format!(" {:<4} {:>8.2}Hz  ", entry.note().to_string(), entry.frequency())),
        Span::styled(format!("{:<10}", format!("{:?}", entry.state())), Style::default().fg(color)),
        Span::raw(meter),
        Span::raw(format!(" {}", level_db)),
        Span::styled(format!("[{}]", detuned.join(" / ")), Style::default().fg(Color::DarkGray)),
    ])
}
