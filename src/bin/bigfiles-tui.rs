use anyhow::Context;
use bigfiles::{
    BandTreemap, CompletedScan, NavError, NodeId, Rect, ScanConfig, ScanState, ScanTarget,
    Scanner, TreeNavigator, TreemapItem, TreemapLayout,
};
use clap::Parser;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers,
    MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Layout, Rect as UiRect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Paragraph, Widget};
use ratatui::{Frame, Terminal};
use std::fs::OpenOptions;
use std::io::{self, stdout};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Terminal disk-usage treemap.
#[derive(Debug, Parser)]
#[command(name = "bigfiles-tui", version)]
struct Args {
    /// Directory to scan on startup
    path: Option<PathBuf>,

    /// JSON file with scan settings; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scan worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Only scan this many levels up front; deeper folders load when opened
    #[arg(long)]
    max_depth: Option<usize>,

    /// Ignore dot-files and dot-directories
    #[arg(long)]
    skip_hidden: bool,

    /// Do not add lazily loaded folder sizes to their parents
    #[arg(long)]
    no_propagate: bool,

    /// Write logs here (filter with BIGFILES_LOG, default "warn")
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn scan_config(&self) -> anyhow::Result<ScanConfig> {
        let base = match &self.config {
            Some(path) => ScanConfig::load_from_file(path)?,
            None => ScanConfig::default(),
        };
        Ok(ScanConfig {
            max_concurrency: self.threads.unwrap_or(base.max_concurrency),
            max_depth: self.max_depth.or(base.max_depth),
            skip_hidden: self.skip_hidden || base.skip_hidden,
            propagate_expanded_size: base.propagate_expanded_size && !self.no_propagate,
            ..base
        })
    }
}

struct VisibleTile {
    id: NodeId,
    name: String,
    size: u64,
    is_dir: bool,
    unscanned: bool,
    rect: Rect,
    band: usize,
    /// Fraction of its band's total, 0.0 to 1.0.
    band_share: f32,
}

/// The current folder's layout as last drawn, kept for mouse hit-testing.
struct PlacedTreemap {
    area: UiRect,
    children: Vec<NodeId>,
    layout: TreemapLayout,
}

impl PlacedTreemap {
    fn node_at(&self, column: u16, row: u16) -> Option<NodeId> {
        if !point_in_rect(self.area, column, row) {
            return None;
        }
        // Probe the cell centre so the answer agrees with the rounded drawing.
        let x = f32::from(column - self.area.x) + 0.5;
        let y = f32::from(row - self.area.y) + 0.5;
        let index = self.layout.hit(x, y)?;
        self.children.get(index).copied()
    }
}

#[derive(Default, Clone, Copy)]
struct UiLayoutState {
    path_input_area: Option<UiRect>,
}

struct App {
    navigator: TreeNavigator,
    path_input: String,
    input_mode: bool,
    status: String,
    scan_rx: Option<Receiver<CompletedScan>>,
    scan_started_at: Option<Instant>,
    last_scan_finished_at: Option<Instant>,

    selected: Option<NodeId>,
    placed: Option<PlacedTreemap>,
    ui_layout: UiLayoutState,

    should_quit: bool,
}

impl App {
    fn new(navigator: TreeNavigator, initial_path: Option<PathBuf>) -> Self {
        let input_mode = initial_path.is_none();
        let path_input = initial_path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| String::from("."));
        Self {
            navigator,
            path_input,
            input_mode,
            status: String::from("Type path and press Enter to scan"),
            scan_rx: None,
            scan_started_at: None,
            last_scan_finished_at: None,
            selected: None,
            placed: None,
            ui_layout: UiLayoutState::default(),
            should_quit: false,
        }
    }

    fn start_scan(&mut self) {
        let path = if self.path_input.trim().is_empty() {
            ".".to_string()
        } else {
            self.path_input.trim().to_string()
        };

        if !Path::new(&path).exists() {
            self.status = format!("Path does not exist: {}", path);
            return;
        }

        self.path_input = path.clone();
        self.status = format!("Scanning {} ...", path);
        let pending = self.navigator.request_root(&path);
        self.spawn_scan(pending);
    }

    fn spawn_scan(&mut self, pending: bigfiles::PendingScan) {
        let (tx, rx) = mpsc::channel::<CompletedScan>();
        self.scan_rx = Some(rx);
        self.scan_started_at = Some(Instant::now());

        thread::spawn(move || {
            let _ = tx.send(pending.run());
        });
    }

    fn poll_scan_updates(&mut self) {
        let Some(rx) = self.scan_rx.as_ref() else {
            return;
        };

        let done = match rx.try_recv() {
            Ok(done) => done,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                self.scan_rx = None;
                self.status = "Scan thread exited without a result".to_string();
                return;
            }
        };
        self.scan_rx = None;

        let is_root = matches!(done.target(), ScanTarget::Root);
        match self.navigator.complete(done) {
            Ok(stats) => {
                if is_root {
                    self.selected = None;
                }
                self.last_scan_finished_at = Some(Instant::now());
                self.status = format!(
                    "Scan complete: {} files, {} dirs, {} total, {} skipped",
                    stats.total_files,
                    stats.total_dirs,
                    human_size(stats.total_size),
                    stats.skipped_entries,
                );
            }
            Err(NavError::StaleScan) => {}
            Err(err) => {
                self.status = format!("Scan failed: {}", err);
            }
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char('c')) {
            self.should_quit = true;
            return;
        }

        if self.input_mode {
            match key.code {
                KeyCode::Enter => {
                    self.input_mode = false;
                    self.start_scan();
                }
                KeyCode::Esc => {
                    self.input_mode = false;
                }
                KeyCode::Backspace => {
                    self.path_input.pop();
                }
                KeyCode::Char(ch) => {
                    self.path_input.push(ch);
                }
                _ => {}
            }
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('/') => self.input_mode = true,
            KeyCode::Char('s') | KeyCode::Char('r') => self.start_scan(),
            KeyCode::Enter => {
                if let Some(id) = self.selected {
                    self.open(id);
                }
            }
            KeyCode::Char('u') | KeyCode::Backspace => {
                if self.navigator.up() {
                    self.selected = None;
                    self.scan_rx = None;
                }
            }
            KeyCode::Char('h') => {
                if self.navigator.home() {
                    self.selected = None;
                    self.scan_rx = None;
                }
            }
            KeyCode::Esc => {
                self.selected = None;
            }
            _ => {}
        }
    }

    fn on_mouse(&mut self, event: MouseEvent) {
        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if let Some(path_input_area) = self.ui_layout.path_input_area {
                    if point_in_rect(path_input_area, event.column, event.row) {
                        self.input_mode = true;
                        return;
                    }
                }

                if let Some(id) = self.node_at(event.column, event.row) {
                    self.selected = Some(id);
                    self.open(id);
                }
            }
            MouseEventKind::Down(MouseButton::Right) => {
                if let Some(id) = self.node_at(event.column, event.row) {
                    self.select(id);
                }
            }
            MouseEventKind::Down(MouseButton::Middle) => {
                self.navigator.up();
            }
            _ => {}
        }
    }

    /// Enter a directory, scanning it in the background first if needed.
    fn open(&mut self, id: NodeId) {
        let Some((is_dir, state)) = self.navigator.node(id).map(|e| (e.is_dir, e.state)) else {
            return;
        };
        if !is_dir {
            self.select(id);
            return;
        }

        if state == ScanState::Unscanned {
            match self.navigator.request_expand(id) {
                Ok(pending) => {
                    self.status = format!("Scanning {} ...", pending.location().display());
                    self.spawn_scan(pending);
                }
                Err(err) => self.status = err.to_string(),
            }
            return;
        }

        match self.navigator.enter(id) {
            Ok(()) => {
                self.scan_rx = None;
                self.selected = None;
            }
            Err(err) => self.status = err.to_string(),
        }
    }

    fn select(&mut self, id: NodeId) {
        self.selected = Some(id);
        if let Some(entry) = self.navigator.node(id) {
            self.status = format!("Selected {} ({})", entry.full_path, human_size(entry.size));
        }
    }

    fn build_visible_tiles(&mut self, area: UiRect) -> Vec<VisibleTile> {
        self.placed = None;
        if area.width <= 2 || area.height <= 2 {
            return Vec::new();
        }

        let children = self.navigator.current_children();
        let items: Vec<TreemapItem> = children
            .iter()
            .enumerate()
            .filter_map(|(index, &id)| {
                self.navigator
                    .node(id)
                    .map(|entry| TreemapItem { size: entry.size, index })
            })
            .collect();

        let container = Rect::new(0.0, 0.0, f32::from(area.width), f32::from(area.height));
        let layout = BandTreemap::layout(&items, container);

        let band_count = layout.iter().map(|placed| placed.band + 1).max().unwrap_or(0);
        let mut band_totals = vec![0u64; band_count];
        for placed in layout.iter() {
            let size = items.get(placed.index).map_or(0, |item| item.size);
            band_totals[placed.band] = band_totals[placed.band].saturating_add(size);
        }

        let tiles: Vec<VisibleTile> = layout
            .iter()
            .filter_map(|placed| {
                let id = *children.get(placed.index)?;
                let entry = self.navigator.node(id)?;
                let band_total = band_totals[placed.band];
                let band_share = if band_total == 0 {
                    0.0
                } else {
                    (entry.size as f64 / band_total as f64) as f32
                };
                Some(VisibleTile {
                    id,
                    name: entry.name.clone(),
                    size: entry.size,
                    is_dir: entry.is_dir,
                    unscanned: entry.state == ScanState::Unscanned,
                    rect: placed.rect,
                    band: placed.band,
                    band_share,
                })
            })
            .collect();

        self.placed = Some(PlacedTreemap {
            area,
            children,
            layout,
        });
        tiles
    }

    fn node_at(&self, column: u16, row: u16) -> Option<NodeId> {
        self.placed.as_ref()?.node_at(column, row)
    }

    fn breadcrumb_line(&self) -> Line<'static> {
        let mut spans = Vec::new();
        let crumbs = self.navigator.breadcrumbs();
        for (i, &id) in crumbs.iter().enumerate() {
            let Some(entry) = self.navigator.node(id) else {
                continue;
            };
            if i > 0 {
                spans.push(Span::styled(" / ", Style::default().fg(Color::Gray)));
            }
            let style = if i + 1 == crumbs.len() {
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::LightBlue)
            };
            spans.push(Span::styled(entry.name.clone(), style));
        }
        Line::from(spans)
    }
}

/// Terminal cells covered by a layout rect, edges rounded to the nearest
/// cell. Returns a `UiRect` in buffer coordinates.
fn cell_area(rect: Rect, area: UiRect) -> Option<UiRect> {
    let left = (rect.x.round() as u16).min(area.width);
    let top = (rect.y.round() as u16).min(area.height);
    let right = (rect.right().round() as u16).min(area.width);
    let bottom = (rect.bottom().round() as u16).min(area.height);
    if right <= left || bottom <= top {
        return None;
    }
    Some(UiRect::new(area.x + left, area.y + top, right - left, bottom - top))
}

fn point_in_rect(rect: UiRect, x: u16, y: u16) -> bool {
    x >= rect.x
        && x < rect.x.saturating_add(rect.width)
        && y >= rect.y
        && y < rect.y.saturating_add(rect.height)
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let exponent = (63 - bytes.leading_zeros()) / 10;
    let scaled = bytes as f64 / (1u64 << (10 * exponent)) as f64;
    format!("{scaled:.1} {}", UNITS[exponent as usize])
}

/// Base colour per band, cycling for deep layouts.
const BAND_COLORS: [(f32, f32, f32); 4] = [
    (52.0, 101.0, 164.0),
    (78.0, 154.0, 6.0),
    (196.0, 140.0, 0.0),
    (117.0, 80.0, 123.0),
];

/// Band picks the hue, share of the band picks the brightness, files sit a
/// little darker than folders.
fn tile_background(tile: &VisibleTile) -> Color {
    if tile.unscanned {
        return Color::Rgb(70, 70, 76);
    }
    let (r, g, b) = BAND_COLORS[tile.band % BAND_COLORS.len()];
    let mut lift = 0.5 + 0.5 * tile.band_share.clamp(0.0, 1.0);
    if !tile.is_dir {
        lift *= 0.8;
    }
    Color::Rgb((r * lift) as u8, (g * lift) as u8, (b * lift) as u8)
}

struct TreemapWidget<'a> {
    tiles: &'a [VisibleTile],
    selected: Option<NodeId>,
}

impl Widget for TreemapWidget<'_> {
    fn render(self, area: UiRect, buf: &mut Buffer) {
        // Whatever the bands leave uncovered is drawn as a dotted remainder.
        let remainder = Style::default()
            .fg(Color::Rgb(58, 58, 64))
            .bg(Color::Rgb(18, 18, 20));
        for y in area.top()..area.bottom() {
            for x in area.left()..area.right() {
                buf[(x, y)].set_char('·').set_style(remainder);
            }
        }

        for tile in self.tiles {
            let Some(cells) = cell_area(tile.rect, area) else {
                continue;
            };
            let bg = tile_background(tile);

            let fill = if tile.unscanned { '░' } else { ' ' };
            for y in cells.top()..cells.bottom() {
                for x in cells.left()..cells.right() {
                    buf[(x, y)].set_char(fill).set_style(Style::default().fg(Color::Gray).bg(bg));
                }
            }

            let selected = self.selected == Some(tile.id);
            let (border_type, border_color) = match (selected, tile.is_dir) {
                (true, _) => (BorderType::Thick, Color::Rgb(246, 211, 101)),
                (false, true) => (BorderType::Plain, Color::Rgb(224, 224, 224)),
                (false, false) => (BorderType::Rounded, Color::Rgb(170, 170, 170)),
            };
            let size = if tile.unscanned {
                "?".to_string()
            } else {
                human_size(tile.size)
            };
            let marker = if tile.is_dir { "/" } else { "" };
            let title = Line::from(format!("{}{} {}", tile.name, marker, size))
                .style(Style::default().fg(Color::White).add_modifier(Modifier::BOLD));

            Block::bordered()
                .border_type(border_type)
                .border_style(Style::default().fg(border_color).bg(bg))
                .title(title)
                .render(cells, buf);
        }
    }
}

fn draw_ui(frame: &mut Frame, app: &mut App) {
    let root = frame.area();
    let split = Layout::horizontal([Constraint::Length(42), Constraint::Min(30)]).split(root);
    let left = split[0];
    let right = split[1];

    let left_block = Block::default().title(" bigfiles ").borders(Borders::ALL);
    let left_inner = left_block.inner(left);
    frame.render_widget(left_block, left);

    let left_rows = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(6),
        Constraint::Min(8),
        Constraint::Length(5),
    ])
    .split(left_inner);

    let input_title = if app.input_mode { " Path (typing) " } else { " Path " };
    let path_block = Block::default().title(input_title).borders(Borders::ALL);
    let path_inner = path_block.inner(left_rows[0]);
    frame.render_widget(path_block, left_rows[0]);
    let path_style = if app.input_mode {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::White)
    };
    frame.render_widget(Paragraph::new(app.path_input.as_str()).style(path_style), path_inner);
    app.ui_layout.path_input_area = Some(path_inner);

    let status_text = match (app.navigator.is_scanning(), app.scan_started_at) {
        (true, Some(started)) => format!("{} ({}s)", app.status, started.elapsed().as_secs()),
        _ => app.status.clone(),
    };
    frame.render_widget(
        Paragraph::new(status_text)
            .wrap(ratatui::widgets::Wrap { trim: true })
            .block(Block::default().title(" Status ").borders(Borders::ALL)),
        left_rows[1],
    );

    let mut view_lines = vec![app.breadcrumb_line()];
    if let Some(current) = app.navigator.current_entry() {
        view_lines.push(Line::from(vec![
            Span::styled("Size: ", Style::default().fg(Color::Gray)),
            Span::raw(human_size(current.size)),
            Span::raw("  "),
            Span::styled("Items: ", Style::default().fg(Color::Gray)),
            Span::raw(app.navigator.current_children().len().to_string()),
        ]));
    }
    match app.selected.and_then(|id| app.navigator.node(id)) {
        Some(entry) => {
            view_lines.push(Line::from(vec![
                Span::styled("Selected: ", Style::default().fg(Color::Gray)),
                Span::raw(entry.name.clone()),
            ]));
            view_lines.push(Line::from(vec![
                Span::styled("Type: ", Style::default().fg(Color::Gray)),
                Span::raw(if entry.is_dir { "directory" } else { "file" }),
                Span::raw("  "),
                Span::styled("Size: ", Style::default().fg(Color::Gray)),
                Span::raw(human_size(entry.size)),
            ]));
        }
        None => view_lines.push(Line::from("Selected: (none)")),
    }
    if let Some(instant) = app.last_scan_finished_at {
        view_lines.push(Line::from(format!("Last scan: {}s ago", instant.elapsed().as_secs())));
    }
    frame.render_widget(
        Paragraph::new(view_lines)
            .wrap(ratatui::widgets::Wrap { trim: false })
            .block(Block::default().title(" View ").borders(Borders::ALL)),
        left_rows[2],
    );

    let help_lines = vec![
        Line::from("Enter: scan path    /: edit path"),
        Line::from("Left click: open folder"),
        Line::from("Right click: select   u: up   h: home"),
        Line::from("r: rescan   q: quit"),
    ];
    frame.render_widget(
        Paragraph::new(help_lines).block(Block::default().title(" Controls ").borders(Borders::ALL)),
        left_rows[3],
    );

    let treemap_block = Block::default()
        .title(" Treemap (left click: open, right click: select) ")
        .borders(Borders::ALL);
    let treemap_inner = treemap_block.inner(right);
    frame.render_widget(treemap_block, right);

    let tiles = app.build_visible_tiles(treemap_inner);
    if tiles.is_empty() {
        let message = if app.navigator.current().is_some() {
            "Empty folder"
        } else {
            "No treemap yet. Enter a path and scan."
        };
        frame.render_widget(
            Paragraph::new(message).style(Style::default().fg(Color::Gray)),
            treemap_inner,
        );
    } else {
        frame.render_widget(
            TreemapWidget {
                tiles: &tiles,
                selected: app.selected,
            },
            treemap_inner,
        );
    }
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> io::Result<()> {
    loop {
        app.poll_scan_updates();

        terminal.draw(|frame| {
            draw_ui(frame, app);
        })?;

        if app.should_quit {
            break;
        }

        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) => app.on_key(key),
                Event::Mouse(mouse) => app.on_mouse(mouse),
                Event::Resize(_, _) => {}
                Event::FocusGained | Event::FocusLost | Event::Paste(_) => {}
            }
        }
    }

    app.navigator.cancel_pending();
    Ok(())
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    // Logging to the terminal would draw over the UI, so it is file-only.
    let Some(path) = log_file else {
        return Ok(());
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let filter = EnvFilter::try_from_env("BIGFILES_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref())?;

    let scanner = Scanner::new(args.scan_config()?).context("invalid scan settings")?;
    let navigator = TreeNavigator::new(Arc::new(scanner));
    let mut app = App::new(navigator, args.path.clone());
    if args.path.is_some() {
        app.start_scan();
    }

    enable_raw_mode()?;
    crossterm::execute!(stdout(), EnterAlternateScreen, EnableMouseCapture)?;

    let backend = CrosstermBackend::new(stdout());
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let app_result = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    app_result.map_err(Into::into)
}
