// Terminal viewer for packet capture logs
// Usage: viewer [log_file]
// Without a file, lists the logs found in PROTODEF_LOG_DIR.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use mc_protodef::display::render_tree;
use mc_protodef::{Config, DisplayTree, HandleCatalog, PacketDirection, PacketEntry, ProtocolSet, SessionLog};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

struct ViewerApp {
    config: Config,
    logs: Vec<PathBuf>,
    selected_log: usize,
    current_log: Option<SessionLog>,
    packet_index: usize,
    mode: ViewerMode,
    error_message: Option<String>,
    show_hex: bool,
    packet_details_scroll: u16,
    protocol: Option<(ProtocolSet, HandleCatalog)>,
}

enum ViewerMode {
    SessionList,
    PacketView,
}

fn find_logs(dir: &Path) -> Vec<PathBuf> {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut logs: Vec<PathBuf> = read_dir
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            let name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
            name.ends_with(".bin") || name.ends_with(".bin.gz")
        })
        .collect();
    logs.sort();
    logs
}

impl ViewerApp {
    fn new(config: Config) -> Self {
        let logs = find_logs(&config.log_dir);
        let protocol = match config.load_protocol() {
            Ok(loaded) => Some(loaded),
            Err(e) => {
                warn!(error = %e, "failed to load protocol, packets will not be decoded");
                None
            }
        };
        Self {
            config,
            logs,
            selected_log: 0,
            current_log: None,
            packet_index: 0,
            mode: ViewerMode::SessionList,
            error_message: None,
            show_hex: false,
            packet_details_scroll: 0,
            protocol,
        }
    }

    fn open_log(&mut self, path: &Path) -> Result<()> {
        let log = SessionLog::load(path)?;
        if log.is_empty() {
            return Err(anyhow!("No packets found in {}", path.display()));
        }
        // A log recorded against another version needs that version's schema.
        let version = log.entries.iter().find_map(|e| e.protocol_version.clone());
        if let Some(version) = version.filter(|v| *v != self.config.version) {
            self.config.version = version;
            self.protocol = self.config.load_protocol().ok();
        }
        self.current_log = Some(log);
        self.packet_index = 0;
        self.packet_details_scroll = 0;
        self.mode = ViewerMode::PacketView;
        Ok(())
    }

    fn load_selected(&mut self) -> Result<()> {
        let path = self
            .logs
            .get(self.selected_log)
            .cloned()
            .ok_or_else(|| anyhow!("No log selected"))?;
        self.open_log(&path)
    }

    fn current_packet(&self) -> Option<&PacketEntry> {
        self.current_log.as_ref()?.entries.get(self.packet_index)
    }

    fn prev_packet(&mut self) {
        if self.packet_index > 0 {
            self.packet_index -= 1;
            self.packet_details_scroll = 0;
        }
    }

    fn next_packet(&mut self) {
        if let Some(log) = &self.current_log {
            if self.packet_index < log.len().saturating_sub(1) {
                self.packet_index += 1;
                self.packet_details_scroll = 0;
            }
        }
    }

    fn start_time(&self) -> i64 {
        self.current_log
            .as_ref()
            .and_then(|log| log.entries.first())
            .map_or(0, |e| e.timestamp)
    }
}

fn main() -> Result<()> {
    // Logs go to stderr at warn so the terminal UI stays intact
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::from_env()?;
    let mut app = ViewerApp::new(config);
    if let Some(path) = std::env::args().nth(1) {
        app.open_log(Path::new(&path))?;
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = run(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;
    result
}

fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut ViewerApp) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if !event::poll(std::time::Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match app.mode {
            ViewerMode::SessionList => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Up => {
                    app.selected_log = app.selected_log.saturating_sub(1);
                }
                KeyCode::Down => {
                    if app.selected_log < app.logs.len().saturating_sub(1) {
                        app.selected_log += 1;
                    }
                }
                KeyCode::Enter => {
                    app.error_message = None;
                    if let Err(e) = app.load_selected() {
                        app.error_message = Some(format!("Failed to load log: {}", e));
                    }
                }
                _ => {}
            },
            ViewerMode::PacketView => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => {
                    app.mode = ViewerMode::SessionList;
                    app.current_log = None;
                }
                KeyCode::Left | KeyCode::Char('h') => app.prev_packet(),
                KeyCode::Right | KeyCode::Char('l') => app.next_packet(),
                KeyCode::Up | KeyCode::Char('k') => {
                    app.packet_details_scroll = app.packet_details_scroll.saturating_sub(1);
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    // Clamped against the content height while rendering
                    app.packet_details_scroll += 1;
                }
                KeyCode::PageUp => {
                    for _ in 0..10 {
                        app.prev_packet();
                    }
                }
                KeyCode::PageDown => {
                    for _ in 0..10 {
                        app.next_packet();
                    }
                }
                KeyCode::Home => {
                    app.packet_index = 0;
                    app.packet_details_scroll = 0;
                }
                KeyCode::End => {
                    if let Some(log) = &app.current_log {
                        app.packet_index = log.len().saturating_sub(1);
                        app.packet_details_scroll = 0;
                    }
                }
                KeyCode::Char('x') | KeyCode::Char('X') => {
                    app.show_hex = !app.show_hex;
                    app.packet_details_scroll = 0;
                }
                _ => {}
            },
        }
    }
}

fn ui(f: &mut Frame, app: &mut ViewerApp) {
    match app.mode {
        ViewerMode::SessionList => render_session_list(f, app),
        ViewerMode::PacketView => render_packet_view(f, app),
    }
}

fn render_session_list(f: &mut Frame, app: &ViewerApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(if app.error_message.is_some() {
            vec![Constraint::Length(3), Constraint::Min(0)]
        } else {
            vec![Constraint::Length(0), Constraint::Min(0)]
        })
        .split(f.size());

    if let Some(ref error) = app.error_message {
        let error_paragraph = Paragraph::new(error.as_str())
            .block(Block::default().borders(Borders::ALL).title("Error").style(Style::default().fg(Color::Red)))
            .wrap(Wrap { trim: false });
        f.render_widget(error_paragraph, chunks[0]);
    }

    let items: Vec<ListItem> = app
        .logs
        .iter()
        .map(|path| {
            let name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            ListItem::new(format!("{} | {} bytes", name, size))
        })
        .collect();

    let mut list_state = ListState::default();
    list_state.select(Some(app.selected_log));

    let title = format!(
        "Capture logs in {} (Up/Down to navigate, Enter to open, q to quit)",
        app.config.log_dir.display()
    );
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
    f.render_stateful_widget(list, chunks[1], &mut list_state);
}

fn packet_details(app: &ViewerApp, packet: &PacketEntry) -> String {
    let timestamp_dt = DateTime::<Utc>::from_timestamp_millis(packet.timestamp).unwrap_or_default();
    let mut details = format!(
        "Direction: {}\nTimestamp: {}\nRelative Time: {:.3}s\nSize: {} bytes\n\n",
        packet.direction,
        timestamp_dt.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
        (packet.timestamp - app.start_time()) as f64 / 1000.0,
        packet.data.len()
    );

    if app.show_hex {
        details.push_str("Hex Dump:\n");
        details.push_str(&hex_dump(&packet.data, 16));
        return details;
    }

    let Some((set, catalog)) = &app.protocol else {
        details.push_str("No protocol loaded; press x for the hex dump.\n");
        return details;
    };

    let mut tree = DisplayTree::new();
    let decoded = set.decode_packet(&packet.data, packet.direction, Some(&mut tree));
    if let Some(id) = decoded.id {
        details.push_str(&format!("Packet: {} (0x{:02x})\n", decoded.name, id));
    }
    if let Some(error) = &decoded.error {
        details.push_str(&format!("Decode error: {}\n", error));
    }
    details.push('\n');
    details.push_str(&render_tree(&tree.finish(), Some(catalog)));
    details
}

fn render_packet_view(f: &mut Frame, app: &mut ViewerApp) {
    let Some(log) = &app.current_log else {
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(3), // Timeline
            Constraint::Min(0),    // Packet details
        ])
        .split(f.size());

    let file_name = log
        .path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let total_packets = log.len();
    let view_mode = if app.show_hex { "HEX" } else { "TREE" };
    let header_text = format!(
        "Log: {} | Protocol: {} {} | Packet: {}/{} | View: {} | [Left/Right: navigate, Up/Down: scroll, PgUp/PgDn: jump 10, Home/End, x: view, q: back]",
        file_name,
        app.config.edition,
        app.config.version,
        app.packet_index + 1,
        total_packets,
        view_mode
    );
    let header = Paragraph::new(header_text)
        .block(Block::default().borders(Borders::ALL).title("Packet Viewer"));
    f.render_widget(header, chunks[0]);

    render_timeline(f, chunks[1], app);

    let Some(packet) = app.current_packet() else {
        let empty = Paragraph::new("No packet selected")
            .block(Block::default().borders(Borders::ALL).title("Packet Details"));
        f.render_widget(empty, chunks[2]);
        return;
    };
    let direction_color = match packet.direction {
        PacketDirection::Clientbound => Color::Green,
        PacketDirection::Serverbound => Color::Blue,
    };
    let details = packet_details(app, packet);

    let lines: Vec<&str> = details.lines().collect();
    let max_lines = chunks[2].height.saturating_sub(2) as usize;
    let total_lines = lines.len();
    let max_scroll = total_lines.saturating_sub(max_lines) as u16;
    if app.packet_details_scroll > max_scroll {
        app.packet_details_scroll = max_scroll;
    }
    let scroll = app.packet_details_scroll;

    let start_line = scroll as usize;
    let end_line = (start_line + max_lines).min(total_lines);
    let visible_content = if start_line < total_lines {
        lines[start_line..end_line].join("\n")
    } else {
        String::new()
    };

    let title = format!(
        "Packet Details ({}) {}",
        if app.show_hex { "Hex" } else { "Tree" },
        if max_scroll > 0 {
            format!("[{}/{} lines]", scroll + 1, total_lines)
        } else {
            String::new()
        }
    );
    let details_paragraph = Paragraph::new(visible_content)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::styled(title, Style::default().fg(direction_color))),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(details_paragraph, chunks[2]);
}

fn render_timeline(f: &mut Frame, area: Rect, app: &ViewerApp) {
    let Some(log) = app.current_log.as_ref().filter(|l| !l.is_empty()) else {
        return;
    };

    let window_size = (area.width as usize).saturating_sub(4).min(100);
    let current_idx = app.packet_index;
    let total = log.len();
    let start = current_idx.saturating_sub(window_size / 2);
    let end = (start + window_size).min(total);

    let spans: Vec<Span> = (start..end)
        .map(|i| {
            let (symbol, color) = match log.entries[i].direction {
                PacketDirection::Clientbound => ("v", Color::Green),
                PacketDirection::Serverbound => ("^", Color::Blue),
            };
            let style = if i == current_idx {
                Style::default().fg(color).add_modifier(Modifier::BOLD | Modifier::REVERSED)
            } else {
                Style::default().fg(color)
            };
            Span::styled(symbol, style)
        })
        .collect();

    let timeline = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Timeline (showing {}-{})", start + 1, end)),
    );
    f.render_widget(timeline, area);
}

fn hex_dump(data: &[u8], bytes_per_line: usize) -> String {
    let mut output = String::new();
    for (line, chunk) in data.chunks(bytes_per_line).enumerate() {
        let hex: String = chunk.iter().map(|b| format!("{:02x} ", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|b| if (32..127).contains(b) { *b as char } else { '.' })
            .collect();
        output.push_str(&format!("{:04x}  {:<48} {}\n", line * bytes_per_line, hex, ascii));
    }
    output
}
