/// Shell sessions
///
/// One task per transport connection. The session owns its line editor,
/// per-mode history, the server-path stack of nested ssh hops and the VFS
/// of every frame. Engines are shared process-wide through `SessionCtx`.
/// Incoming chat messages interleave with typing: the renderer clears the
/// input line, prints the message and redraws prompt + buffer.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};

use termsh_core::catalog::Catalog;
use termsh_core::chat::ChatEngine;
use termsh_core::exploits::ExploitEngine;
use termsh_core::mining::MiningEngine;
use termsh_core::models::{new_id, now_secs, ChatMessage, SessionRecord, User};
use termsh_core::servers::ServerGraph;
use termsh_core::shops::ShopEngine;
use termsh_core::store::Store;
use termsh_core::tools::ToolRuntime;
use termsh_core::users::UserService;
use termsh_core::vfs::Vfs;
use termsh_core::Result;

use crate::commands;
use crate::config::Config;
use crate::dispatch::{self, CommandOutcome, BUILTIN_COMMANDS};
use crate::editor::{EditorEvent, History, LineEditor};
use crate::style;

/// Process-wide engine handles, constructed once at boot and shared by
/// every session on both transports.
pub struct SessionCtx {
    pub config: Config,
    pub store: Store,
    pub users: Arc<UserService>,
    pub graph: Arc<ServerGraph>,
    pub tools: Arc<ToolRuntime>,
    pub exploits: Arc<ExploitEngine>,
    pub mining: Arc<MiningEngine>,
    pub shops: Arc<ShopEngine>,
    pub chat: Arc<ChatEngine>,
    pub catalog: Arc<Catalog>,
    pub shutdown: watch::Receiver<bool>,
}

/// Write half handed to the transport adapter.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Outbound {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { tx }
    }

    pub fn send(&self, text: &str) {
        let _ = self.tx.send(text.as_bytes().to_vec());
    }
}

enum SaveTarget {
    UserHome(String),
    Server(String),
}

/// One level of the ssh stack. `server_path` is None for the user's own
/// shell at the bottom.
struct Frame {
    server_path: Option<String>,
    vfs: Vfs,
}

enum Mode {
    Shell,
    Edit { path: String, lines: Vec<String> },
    Chat { room: Option<String>, split: bool },
}

impl Mode {
    fn history_slot(&self) -> usize {
        match self {
            Mode::Shell => 0,
            Mode::Edit { .. } => 1,
            Mode::Chat { .. } => 2,
        }
    }
}

pub struct ShellSession {
    pub id: String,
    pub user: User,
    pub transport: &'static str,
    pub ctx: Arc<SessionCtx>,
    pub out: Outbound,
    frames: Vec<Frame>,
    mode: Mode,
    editor: LineEditor,
    histories: [History; 3],
    persist_tx: mpsc::UnboundedSender<(SaveTarget, Value)>,
}

impl ShellSession {
    pub async fn new(
        ctx: Arc<SessionCtx>,
        user: User,
        transport: &'static str,
        out: Outbound,
    ) -> Result<Self> {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        spawn_persistence_task(ctx.store.clone(), persist_rx);

        let mut session = Self {
            id: new_id(),
            user,
            transport,
            ctx,
            out,
            frames: Vec::new(),
            mode: Mode::Shell,
            editor: LineEditor::new(),
            histories: Default::default(),
            persist_tx,
        };
        let home = session.build_home_frame().await?;
        session.frames.push(home);
        Ok(session)
    }

    async fn build_home_frame(&self) -> Result<Frame> {
        let builtins: Vec<(String, String)> = BUILTIN_COMMANDS
            .iter()
            .map(|(n, d)| (n.to_string(), d.to_string()))
            .collect();
        let tool_descriptors = self.tool_descriptors(&self.user.id).await?;
        let mut vfs = Vfs::load(
            &self.user.username,
            &builtins,
            &tool_descriptors,
            &self.user.filesystem,
        )?;
        let tx = self.persist_tx.clone();
        let user_id = self.user.id.clone();
        vfs.set_save_hook(Box::new(move |overlay| {
            let _ = tx.send((SaveTarget::UserHome(user_id.clone()), overlay));
        }));
        Ok(Frame { server_path: None, vfs })
    }

    async fn tool_descriptors(&self, user_id: &str) -> Result<Vec<(String, String)>> {
        let mut descriptors = Vec::new();
        for state in self.ctx.tools.owned(user_id).await? {
            let description = self
                .ctx
                .store
                .get_tool_by_name(&state.tool_name)
                .await?
                .map(|t| t.description)
                .unwrap_or_default();
            descriptors.push((state.tool_name, description));
        }
        Ok(descriptors)
    }

    /// Open the VFS of an exploited server and push it onto the stack.
    pub async fn push_server_frame(&mut self, server_path: String) -> Result<()> {
        let server = self.ctx.graph.resolve_path(&server_path).await?;
        let builtins: Vec<(String, String)> = BUILTIN_COMMANDS
            .iter()
            .map(|(n, d)| (n.to_string(), d.to_string()))
            .collect();
        let mut listed = Vec::new();
        for name in &server.listed_tools {
            let description = self
                .ctx
                .store
                .get_tool_by_name(name)
                .await?
                .map(|t| t.description)
                .unwrap_or_default();
            listed.push((name.clone(), description));
        }
        let mut vfs = Vfs::load("root", &builtins, &listed, &server.filesystem)?;
        let tx = self.persist_tx.clone();
        let ip = server.ip.clone();
        vfs.set_save_hook(Box::new(move |overlay| {
            let _ = tx.send((SaveTarget::Server(ip.clone()), overlay));
        }));
        self.frames.push(Frame { server_path: Some(server_path), vfs });
        Ok(())
    }

    /// Pop one ssh level. Returns false when already at the bottom (the
    /// caller closes the transport).
    pub fn pop_frame(&mut self) -> bool {
        if self.frames.len() > 1 {
            self.frames.pop();
            true
        } else {
            false
        }
    }

    pub fn vfs(&self) -> &Vfs {
        &self.frames.last().expect("at least the home frame").vfs
    }

    pub fn vfs_mut(&mut self) -> &mut Vfs {
        &mut self.frames.last_mut().expect("at least the home frame").vfs
    }

    /// The bottom frame's VFS — the user's own home, regardless of ssh
    /// depth.
    pub fn home_vfs_mut(&mut self) -> &mut Vfs {
        &mut self.frames.first_mut().expect("at least the home frame").vfs
    }

    /// The server path of the frame we are on; None on the own shell.
    pub fn current_path(&self) -> Option<&str> {
        self.frames
            .last()
            .and_then(|f| f.server_path.as_deref())
    }

    /// Register the freshly downloaded tool as a command + descriptor in
    /// the home frame.
    pub fn register_tool_command(&mut self, name: &str, description: &str) {
        if let Some(home) = self.frames.first_mut() {
            let _ = home.vfs.add_user_command(name, description);
        }
    }

    pub async fn refresh_user(&mut self) -> Result<()> {
        self.user = self.ctx.users.get(&self.user.id).await?;
        Ok(())
    }

    fn prompt(&self) -> String {
        match &self.mode {
            Mode::Shell => style::prompt(&self.user.username, self.current_path()),
            Mode::Edit { path, .. } => format!("edit:{}> ", path),
            Mode::Chat { room, .. } => match room {
                Some(room) => format!("[{}]> ", room),
                None => "[chat]> ".to_string(),
            },
        }
    }

    fn render_prompt(&self) {
        self.out.send(&self.editor.render(&self.prompt()));
    }

    /// Drive the session until the transport closes, the user quits or the
    /// process shuts down.
    pub async fn run(mut self, mut input: mpsc::UnboundedReceiver<Vec<u8>>) {
        let record = SessionRecord {
            id: self.id.clone(),
            user_id: self.user.id.clone(),
            username: self.user.username.clone(),
            transport: self.transport.to_string(),
            connected_at: now_secs(),
        };
        if let Err(e) = self.ctx.store.insert_session(&record).await {
            tracing::warn!("⚠️  Could not record session {}: {}", self.id, e);
        }
        let mut chat_rx = self.ctx.chat.register_session(&self.id, &self.user.id).await;
        let mut shutdown = self.ctx.shutdown.clone();

        tracing::info!(
            "🔌 Session {} opened for {} over {}",
            self.id,
            self.user.username,
            self.transport
        );
        self.out.send(&style::welcome_banner(&self.user.username));
        self.render_prompt();

        loop {
            tokio::select! {
                chunk = input.recv() => {
                    match chunk {
                        Some(bytes) => {
                            if !self.handle_bytes(&bytes).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                message = chat_rx.recv() => {
                    if let Some(message) = message {
                        self.render_incoming(&message).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.out.send(style::NEWLINE);
                        self.out.send(&style::info_line("Server is shutting down. Bye."));
                        break;
                    }
                }
            }
        }

        self.ctx.chat.unregister_session(&self.id).await;
        if let Err(e) = self.ctx.store.delete_session(&self.id).await {
            tracing::warn!("⚠️  Could not drop session row {}: {}", self.id, e);
        }
        tracing::info!("🔌 Session {} closed ({})", self.id, self.user.username);
    }

    /// Returns false when the session should end.
    async fn handle_bytes(&mut self, bytes: &[u8]) -> bool {
        let events = self.editor.feed(bytes);
        for event in events {
            match event {
                EditorEvent::Line(line) => {
                    self.out.send(style::NEWLINE);
                    if !self.handle_line(&line).await {
                        return false;
                    }
                }
                EditorEvent::Tab => self.complete().await,
                EditorEvent::Interrupt => {
                    self.out.send(style::NEWLINE);
                }
                EditorEvent::Eof => {
                    // Ctrl+D behaves like `exit` in shell mode, leaves
                    // sub-modes otherwise.
                    if matches!(self.mode, Mode::Shell) {
                        self.out.send(style::NEWLINE);
                        if !self.pop_frame() {
                            return false;
                        }
                    } else {
                        self.leave_mode();
                    }
                }
                EditorEvent::Escape | EditorEvent::Quit => {
                    if !matches!(self.mode, Mode::Shell) {
                        self.leave_mode();
                    }
                }
                EditorEvent::ClearScreen => {
                    self.out.send(style::CLEAR_SCREEN);
                }
                EditorEvent::HistoryPrev => {
                    let current = self.editor.line();
                    if let Some(entry) =
                        self.histories[self.mode.history_slot()].prev(&current)
                    {
                        self.editor.set_line(&entry);
                    }
                }
                EditorEvent::HistoryNext => {
                    if let Some(entry) = self.histories[self.mode.history_slot()].next() {
                        self.editor.set_line(&entry);
                    }
                }
            }
        }
        self.render_prompt();
        true
    }

    async fn handle_line(&mut self, line: &str) -> bool {
        self.histories[self.mode.history_slot()].push(line);
        match &self.mode {
            Mode::Shell => self.handle_shell_line(line).await,
            Mode::Edit { .. } => {
                self.handle_edit_line(line);
                true
            }
            Mode::Chat { .. } => {
                self.handle_chat_line(line).await;
                true
            }
        }
    }

    async fn handle_shell_line(&mut self, line: &str) -> bool {
        match dispatch::dispatch(self, line).await {
            Ok(CommandOutcome::Output(text)) => {
                if !text.is_empty() {
                    self.out.send(&text);
                }
            }
            Ok(CommandOutcome::Quit) => {
                self.out.send(&style::info_line("Bye."));
                return false;
            }
            Ok(CommandOutcome::ExitSsh) => {
                if !self.pop_frame() {
                    self.out.send(&style::info_line("Bye."));
                    return false;
                }
            }
            Ok(CommandOutcome::SshConnect(path)) => {
                if let Err(e) = self.push_server_frame(path.clone()).await {
                    self.out.send(&style::error_line(&e.to_string()));
                } else {
                    self.out.send(&style::ok_line(&format!("Connected to {}", path)));
                }
            }
            Ok(CommandOutcome::EnterEdit(path)) => {
                let lines = match self.vfs().read_file(&path) {
                    Ok(content) if !content.is_empty() => {
                        content.lines().map(str::to_string).collect()
                    }
                    _ => Vec::new(),
                };
                self.out.send(&style::info_line(&format!(
                    "Editing {} — lines append; :save writes, :exit discards.",
                    path
                )));
                self.mode = Mode::Edit { path, lines };
            }
            Ok(CommandOutcome::EnterChat { split }) => {
                if split {
                    self.out.send(style::CLEAR_SCREEN);
                }
                self.out.send(&style::heading("— chat — /rooms lists rooms, /help for commands, Esc leaves —"));
                self.mode = Mode::Chat { room: None, split };
            }
            Err(e) => {
                self.out.send(&style::error_line(&e.to_string()));
            }
        }
        true
    }

    fn handle_edit_line(&mut self, line: &str) {
        let Mode::Edit { path, mut lines } = std::mem::replace(&mut self.mode, Mode::Shell)
        else {
            return;
        };
        match line.trim() {
            ":save" => {
                let content = lines.join("\n");
                match self.vfs_mut().write_file(&path, &content) {
                    Ok(()) => self.out.send(&style::ok_line(&format!("Wrote {}", path))),
                    Err(e) => self.out.send(&style::error_line(&e.to_string())),
                }
            }
            ":exit" | ":q" => {
                self.out.send(&style::info_line("Discarded."));
            }
            _ => {
                lines.push(line.to_string());
                self.mode = Mode::Edit { path, lines };
            }
        }
    }

    async fn handle_chat_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        if trimmed == ":exit" {
            self.leave_mode();
            return;
        }
        if let Some(rest) = trimmed.strip_prefix('/') {
            self.handle_chat_command(rest).await;
            return;
        }
        let Mode::Chat { room: Some(room), .. } = &self.mode else {
            self.out
                .send(&style::error_line("join a room first: /join <room>"));
            return;
        };
        let room = room.clone();
        if let Err(e) = self
            .ctx
            .chat
            .send_message(&room, &self.user.id, &self.user.username, trimmed)
            .await
        {
            self.out.send(&style::error_line(&e.to_string()));
        }
    }

    async fn handle_chat_command(&mut self, command: &str) {
        let argv = dispatch::parse_argv(command);
        let Some(cmd) = argv.first().map(String::as_str) else {
            return;
        };
        let args = &argv[1..];
        if cmd == "exit" {
            self.leave_mode();
            return;
        }
        let result = commands::chat_command(self, cmd, args).await;
        match result {
            Ok(Some(text)) => self.out.send(&text),
            Ok(None) => {}
            Err(e) => self.out.send(&style::error_line(&e.to_string())),
        }
    }

    pub fn set_chat_room(&mut self, room_name: Option<String>) {
        if let Mode::Chat { room, .. } = &mut self.mode {
            *room = room_name;
        }
    }

    pub fn current_chat_room(&self) -> Option<String> {
        match &self.mode {
            Mode::Chat { room, .. } => room.clone(),
            _ => None,
        }
    }

    fn leave_mode(&mut self) {
        match std::mem::replace(&mut self.mode, Mode::Shell) {
            Mode::Chat { split, .. } => {
                if split {
                    self.out.send(style::CLEAR_SCREEN);
                }
                self.out.send(&style::info_line("Left chat mode."));
            }
            Mode::Edit { .. } => {
                self.out.send(&style::info_line("Discarded."));
            }
            Mode::Shell => {}
        }
    }

    /// Inject an incoming chat message above the prompt: clear the input
    /// line, print, redraw prompt and buffer.
    async fn render_incoming(&mut self, message: &ChatMessage) {
        let room = self
            .ctx
            .chat
            .room_name_of(&message.room_id)
            .await
            .unwrap_or_else(|| "?".to_string());
        let line = match &self.mode {
            Mode::Chat { room: Some(current), .. } if *current == room => {
                style::chat_line(&message.username, &message.content)
            }
            _ => format!(
                "{}{}",
                style::CLEAR_LINE,
                style::chat_line(&message.username, &format!("[{}] {}", room, message.content))
            ),
        };
        self.out.send(style::CLEAR_LINE);
        self.out.send(&line);
        self.render_prompt();
    }

    /// Tab completion across commands, tools, vfs entries, server ips,
    /// tutorial ids and room names, keyed on the first token.
    async fn complete(&mut self) {
        let line = self.editor.line();
        let (candidates, partial) = self.completion_candidates(&line).await;
        let matching: Vec<&String> = candidates
            .iter()
            .filter(|c| c.starts_with(&partial))
            .collect();
        match matching.len() {
            0 => {}
            1 => {
                let remainder = &matching[0][partial.len()..];
                self.editor.insert_text(remainder);
                if !remainder.ends_with('/') {
                    self.editor.insert_text(" ");
                }
            }
            _ => {
                let common = common_prefix(&matching);
                if common.len() > partial.len() {
                    self.editor.insert_text(&common[partial.len()..]);
                } else {
                    let mut list = String::from(style::NEWLINE);
                    for candidate in &matching {
                        list.push_str(candidate);
                        list.push_str("  ");
                    }
                    list.push_str(style::NEWLINE);
                    self.out.send(&list);
                }
            }
        }
    }

    async fn completion_candidates(&self, line: &str) -> (Vec<String>, String) {
        let ends_with_space = line.ends_with(' ');
        let tokens = dispatch::parse_argv(line);
        let partial = if ends_with_space {
            String::new()
        } else {
            tokens.last().cloned().unwrap_or_default()
        };
        let arg_index = if ends_with_space { tokens.len() } else { tokens.len().saturating_sub(1) };

        if matches!(self.mode, Mode::Chat { .. }) {
            if arg_index == 0 {
                let cmds = ["/create", "/join", "/leave", "/invite", "/rooms", "/who", "/history", "/help"];
                return (cmds.iter().map(|s| s.to_string()).collect(), partial);
            }
            let rooms = self.ctx.chat.list_rooms().await;
            return (rooms.into_iter().map(|r| r.name).collect(), partial);
        }

        if arg_index == 0 {
            let mut names: Vec<String> = BUILTIN_COMMANDS.iter().map(|(n, _)| n.to_string()).collect();
            if let Ok(states) = self.ctx.tools.owned(&self.user.id).await {
                names.extend(states.into_iter().map(|s| s.tool_name));
            }
            return (names, partial);
        }

        let first = tokens.first().map(String::as_str).unwrap_or("");
        let candidates = match first {
            "cd" | "ls" | "cat" | "rm" | "cp" | "mv" | "touch" | "mkdir" | "edit" | "vi"
            | "nano" => {
                // complete within the partial's directory part
                let (dir, _) = partial.rsplit_once('/').unwrap_or(("", partial.as_str()));
                let base = if partial.starts_with('/') && dir.is_empty() { "/" } else if dir.is_empty() { "." } else { dir };
                let prefix = if dir.is_empty() {
                    String::new()
                } else {
                    format!("{}/", dir)
                };
                self.vfs()
                    .entries_for_completion(base)
                    .into_iter()
                    .map(|entry| format!("{}{}", prefix, entry))
                    .collect()
            }
            "tutorial" => self.ctx.catalog.tutorials.iter().map(|t| t.id.clone()).collect(),
            "patch" => {
                if arg_index == 1 {
                    let mut names = vec!["info".to_string()];
                    names.extend(
                        self.ctx
                            .tools
                            .inventory_patches(&self.user.id)
                            .await
                            .unwrap_or_default(),
                    );
                    names
                } else {
                    self.ctx
                        .tools
                        .owned(&self.user.id)
                        .await
                        .map(|states| states.into_iter().map(|s| s.tool_name).collect())
                        .unwrap_or_default()
                }
            }
            "shop" | "buy" => self
                .ctx
                .shops
                .list_shops()
                .await
                .map(|shops| shops.into_iter().map(|s| s.name).collect())
                .unwrap_or_default(),
            "get" if arg_index == 2 => {
                match self.ctx.graph.get_server_by_ip(&tokens[1]).await {
                    Ok(server) => server.listed_tools,
                    Err(_) => Vec::new(),
                }
            }
            _ => self.known_ips().await,
        };
        (candidates, partial)
    }

    /// Server ips visible from here: top-level ones at the root shell, the
    /// current server's neighbors inside ssh.
    async fn known_ips(&self) -> Vec<String> {
        match self.current_path() {
            Some(path) => match self.ctx.graph.resolve_path(path).await {
                Ok(server) => {
                    let mut ips = server.connected_ips;
                    ips.extend(server.local_network);
                    ips
                }
                Err(_) => Vec::new(),
            },
            None => self
                .ctx
                .graph
                .list_top_level()
                .await
                .map(|servers| servers.into_iter().map(|s| s.ip).collect())
                .unwrap_or_default(),
        }
    }
}

fn common_prefix(candidates: &[&String]) -> String {
    let Some(first) = candidates.first() else {
        return String::new();
    };
    let mut prefix = first.as_str();
    for candidate in &candidates[1..] {
        while !candidate.starts_with(prefix) {
            prefix = &prefix[..prefix.len() - 1];
            if prefix.is_empty() {
                return String::new();
            }
        }
    }
    prefix.to_string()
}

fn spawn_persistence_task(
    store: Store,
    mut rx: mpsc::UnboundedReceiver<(SaveTarget, Value)>,
) {
    tokio::spawn(async move {
        while let Some((target, overlay)) = rx.recv().await {
            let result = match &target {
                SaveTarget::UserHome(user_id) => {
                    store.save_user_filesystem(user_id, &overlay).await
                }
                SaveTarget::Server(ip) => store.save_server_filesystem(ip, &overlay).await,
            };
            // Best-effort durability: the in-memory tree stays authoritative
            // and a later write carries the full overlay again.
            if let Err(e) = result {
                tracing::warn!("⚠️  Filesystem overlay save failed: {}", e);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_prefix() {
        let a = "password_cracker".to_string();
        let b = "password_sniffer".to_string();
        let c = "packet_capture".to_string();
        assert_eq!(common_prefix(&[&a, &b]), "password_");
        assert_eq!(common_prefix(&[&a, &b, &c]), "pa");
        assert_eq!(common_prefix(&[]), "");
    }
}
