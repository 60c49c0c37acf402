//! Output formatting utilities for the CLI
//!
//! [`Display`] renders tunnel port states, either as a live redrawn screen
//! in an interactive terminal or as one line per change otherwise.
//! [`format_status`] renders a daemon status snapshot as plain text with a
//! table of ports.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};

use crossterm::cursor::MoveTo;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};
use crossterm::queue;
use tabled::{settings::Style, Table, Tabled};

use tunn_core::ipc::ControlResponse;
use tunn_core::{PortMapping, PortState, TunnelStatus};

const TUNNEL_COLORS: [Color; 5] = [
    Color::Cyan,
    Color::Yellow,
    Color::Magenta,
    Color::Blue,
    Color::Green,
];

/// Terminal color for a port state
fn state_color(state: &PortState) -> Color {
    match state {
        PortState::Active => Color::Green,
        PortState::Error(_) => Color::Red,
        PortState::Connecting | PortState::Stopping => Color::Yellow,
        PortState::Pending | PortState::Unknown(_) => Color::DarkGrey,
    }
}

/// `local ➜ remote` label for a configured port mapping
pub fn port_label(key: &str) -> String {
    match PortMapping::parse(key) {
        Ok(mapping) => match mapping.bind {
            Some(bind) => format!("{}:{} ➜ {}", bind, mapping.local, mapping.remote),
            None => format!("{} ➜ {}", mapping.local, mapping.remote),
        },
        Err(_) => key.to_string(),
    }
}

/// Ports ordered by local port number, unparseable keys last
fn sorted_ports(ports: &BTreeMap<String, PortState>) -> Vec<(&String, &PortState)> {
    let mut sorted: Vec<_> = ports.iter().collect();
    sorted.sort_by_key(|(key, _)| {
        let local = PortMapping::parse(key).map(|m| m.local).ok();
        (local.is_none(), local, (*key).clone())
    });
    sorted
}

/// Live view of tunnel port states
pub struct Display<W: Write> {
    out: W,
    live: bool,
    tunnels: BTreeMap<String, BTreeMap<String, PortState>>,
    colors: HashMap<String, Color>,
    footer: String,
}

impl Display<io::Stdout> {
    /// Display on stdout; `live` redraws the screen on every change
    pub fn stdout(live: bool) -> Self {
        Self::new(io::stdout(), live)
    }
}

impl<W: Write> Display<W> {
    pub fn new(out: W, live: bool) -> Self {
        Self {
            out,
            live,
            tunnels: BTreeMap::new(),
            colors: HashMap::new(),
            footer: String::new(),
        }
    }

    /// Record a port state and show it
    pub fn update(&mut self, tunnel: &str, port: &str, state: PortState) {
        self.tunnels
            .entry(tunnel.to_string())
            .or_default()
            .insert(port.to_string(), state.clone());

        if self.live {
            let _ = self.render();
        } else {
            let _ = self.print_line(tunnel, port, &state);
        }
    }

    /// Message shown beneath the tunnels; empty hides it
    pub fn set_footer(&mut self, message: &str) {
        let message = message.trim();
        if self.footer == message {
            return;
        }
        self.footer = message.to_string();

        if self.live {
            let _ = self.render();
        } else if !self.footer.is_empty() {
            let _ = writeln!(self.out, "{}", self.footer);
        }
    }

    /// Clear the screen in live mode
    pub fn clear(&mut self) {
        if self.live {
            let _ = queue!(self.out, MoveTo(0, 0), Clear(ClearType::All));
            let _ = self.out.flush();
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn color_for(&mut self, tunnel: &str) -> Color {
        let next = TUNNEL_COLORS[self.colors.len() % TUNNEL_COLORS.len()];
        *self.colors.entry(tunnel.to_string()).or_insert(next)
    }

    fn print_line(&mut self, tunnel: &str, port: &str, state: &PortState) -> io::Result<()> {
        let color = self.color_for(tunnel);
        queue!(
            self.out,
            SetForegroundColor(color),
            Print(format!("[{}]", tunnel)),
            ResetColor,
            Print(format!(" {} ", port_label(port))),
            SetForegroundColor(state_color(state)),
            Print(format!("[{}]", state)),
            ResetColor,
            Print("\n")
        )?;
        self.out.flush()
    }

    fn render(&mut self) -> io::Result<()> {
        queue!(
            self.out,
            MoveTo(0, 0),
            Clear(ClearType::All),
            SetForegroundColor(Color::DarkGrey),
            Print("tunn is listening...\n\n"),
            ResetColor
        )?;

        let names: Vec<String> = self.tunnels.keys().cloned().collect();
        for name in names {
            let color = self.color_for(&name);
            queue!(
                self.out,
                SetForegroundColor(color),
                Print(format!("[{}]\n", name)),
                ResetColor
            )?;

            if let Some(ports) = self.tunnels.get(&name) {
                for (port, state) in sorted_ports(ports) {
                    queue!(
                        self.out,
                        Print(format!("    {} ", port_label(port))),
                        SetForegroundColor(state_color(state)),
                        Print(format!("[{}]", state)),
                        ResetColor,
                        Print("\n")
                    )?;
                }
            }
            queue!(self.out, Print("\n"))?;
        }

        if !self.footer.is_empty() {
            queue!(self.out, Print(format!("{}\n", self.footer)))?;
        }
        self.out.flush()
    }
}

/// Summary line for a daemon response
pub fn status_summary(response: &ControlResponse) -> String {
    format!(
        "Daemon: {} (pid {}, mode {})",
        if response.running { "running" } else { "stopped" },
        response.pid,
        response.mode
    )
}

/// Format a status snapshot as plain text
///
/// Tunnels and ports are listed in name order, one table row per port.
pub fn format_status(response: &ControlResponse) -> String {
    let mut output = status_summary(response);
    output.push('\n');

    if response.tunnels.is_empty() {
        output.push_str("No tunnels managed by daemon\n");
        return output;
    }

    #[derive(Tabled)]
    struct PortRow {
        #[tabled(rename = "TUNNEL")]
        tunnel: String,
        #[tabled(rename = "PORT")]
        port: String,
        #[tabled(rename = "STATE")]
        state: String,
    }

    let mut tunnels: Vec<&TunnelStatus> = response.tunnels.iter().collect();
    tunnels.sort_by(|a, b| a.name.cmp(&b.name));

    let rows: Vec<PortRow> = tunnels
        .iter()
        .flat_map(|tunnel| {
            sorted_ports(&tunnel.ports)
                .into_iter()
                .map(move |(port, state)| PortRow {
                    tunnel: tunnel.name.clone(),
                    port: port.clone(),
                    state: state.to_string(),
                })
        })
        .collect();

    output.push_str(&Table::new(rows).with(Style::blank()).to_string());
    output.push('\n');
    output
}

/// Print a status snapshot with colored states
pub fn print_status(response: &ControlResponse) {
    let mut display = Display::stdout(false);
    let mut tunnels: Vec<&TunnelStatus> = response.tunnels.iter().collect();
    tunnels.sort_by(|a, b| a.name.cmp(&b.name));

    let mut summary = status_summary(response);
    if tunnels.is_empty() {
        summary.push_str(" - no tunnels managed");
    }
    if response.has_error() {
        summary.push_str(" - errors detected");
    }
    println!("{}", summary);

    for tunnel in tunnels {
        for (port, state) in sorted_ports(&tunnel.ports) {
            display.update(&tunnel.name, port, state.clone());
        }
    }
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("warning: "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
