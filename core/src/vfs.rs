/// Virtual filesystem
///
/// Each session holds one VFS per shell frame: an in-memory tree built from
/// a fixed standard skeleton with the persisted overlay merged on top. Every
/// mutation recomputes the overlay (the non-skeleton subset) and hands it to
/// the save hook; persistence is best-effort and never rolls back the
/// in-memory tree.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::error::{GameError, Result};

const STANDARD_NODE_MSG: &str = "cannot modify standard filesystem node";

const README_CONTENT: &str = "\
Welcome to terminal.sh.

Run `help` for the command list, `tutorial` for a guided start and
`scan` to look around the network. Everything under this directory
is yours and survives reconnects.
";

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub is_dir: bool,
    pub content: String,
    pub children: BTreeMap<String, Node>,
}

impl Node {
    fn dir(name: &str) -> Self {
        Node {
            name: name.to_string(),
            is_dir: true,
            content: String::new(),
            children: BTreeMap::new(),
        }
    }

    fn file(name: &str, content: &str) -> Self {
        Node {
            name: name.to_string(),
            is_dir: false,
            content: content.to_string(),
            children: BTreeMap::new(),
        }
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.get(name)
    }

    fn descend(&self, path: &[String]) -> Option<&Node> {
        let mut node = self;
        for part in path {
            node = node.child(part)?;
        }
        Some(node)
    }

    fn descend_mut(&mut self, path: &[String]) -> Option<&mut Node> {
        let mut node = self;
        for part in path {
            node = node.children.get_mut(part)?;
        }
        Some(node)
    }

    /// Ensure a directory chain exists and return the final directory.
    fn make_dirs(&mut self, path: &[String]) -> Result<&mut Node> {
        let mut node = self;
        for part in path {
            if let Some(existing) = node.children.get(part) {
                if !existing.is_dir {
                    return Err(GameError::conflict(format!("{} is not a directory", part)));
                }
            } else {
                node.children.insert(part.clone(), Node::dir(part));
            }
            node = node.children.get_mut(part).expect("just inserted");
        }
        Ok(node)
    }
}

/// A single `ls` row.
#[derive(Debug, Clone, PartialEq)]
pub struct LsEntry {
    pub name: String,
    pub is_dir: bool,
    /// Content bytes for files, child count for directories.
    pub size: usize,
}

pub type SaveHook = Box<dyn Fn(Value) + Send + Sync>;

pub struct Vfs {
    root: Node,
    skeleton: Node,
    home_user: String,
    cwd: Vec<String>,
    save: Option<SaveHook>,
}

impl Vfs {
    /// Build the standard skeleton for `username`:
    /// `/`, `/home/<username>` with a README, `/bin` holding one descriptor
    /// file per builtin command and `/usr/bin` one per owned tool.
    pub fn build(
        username: &str,
        builtin_commands: &[(String, String)],
        tool_commands: &[(String, String)],
    ) -> Self {
        let skeleton = build_skeleton(username, builtin_commands, tool_commands);
        let home = vec!["home".to_string(), username.to_string()];
        Vfs {
            root: skeleton.clone(),
            skeleton,
            home_user: username.to_string(),
            cwd: home,
            save: None,
        }
    }

    /// Build the skeleton and merge a persisted overlay on top.
    pub fn load(
        username: &str,
        builtin_commands: &[(String, String)],
        tool_commands: &[(String, String)],
        overlay: &Value,
    ) -> Result<Self> {
        let mut vfs = Self::build(username, builtin_commands, tool_commands);
        vfs.merge_overlay(overlay)?;
        Ok(vfs)
    }

    pub fn set_save_hook(&mut self, hook: SaveHook) {
        self.save = Some(hook);
    }

    pub fn username(&self) -> &str {
        &self.home_user
    }

    fn home_path(&self) -> Vec<String> {
        vec!["home".to_string(), self.home_user.clone()]
    }

    fn emit_save(&self) {
        if let Some(hook) = &self.save {
            hook(self.extract_overlay());
        }
    }

    /// Normalize a path string against the cwd. Supports `/absolute`,
    /// relative, `.`, `..` and `~`. `..` above the root clamps at the root.
    pub fn resolve(&self, path: &str) -> Vec<String> {
        let mut parts: Vec<String> = if path.starts_with('/') {
            Vec::new()
        } else if path == "~" || path.starts_with("~/") {
            self.home_path()
        } else {
            self.cwd.clone()
        };
        let trimmed = path.trim_start_matches('~');
        for part in trimmed.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other.to_string()),
            }
        }
        parts
    }

    fn node(&self, path: &[String]) -> Option<&Node> {
        self.root.descend(path)
    }

    fn is_standard(&self, path: &[String]) -> bool {
        self.skeleton.descend(path).is_some()
    }

    pub fn pwd(&self) -> String {
        format_path(&self.cwd)
    }

    pub fn cd(&mut self, path: &str) -> Result<()> {
        let target = self.resolve(path);
        // `cd ~` with a missing home rebuilds it.
        if target == self.home_path() && self.node(&target).is_none() {
            self.root.make_dirs(&target)?;
            self.emit_save();
        }
        match self.node(&target) {
            Some(node) if node.is_dir => {
                self.cwd = target;
                Ok(())
            }
            Some(_) => Err(GameError::invalid(format!("{} is not a directory", path))),
            None => Err(GameError::not_found(path.to_string())),
        }
    }

    pub fn ls(&self, path: Option<&str>, all: bool) -> Result<Vec<LsEntry>> {
        let target = match path {
            Some(p) => self.resolve(p),
            None => self.cwd.clone(),
        };
        let node = self
            .node(&target)
            .ok_or_else(|| GameError::not_found(path.unwrap_or(".").to_string()))?;
        if !node.is_dir {
            return Ok(vec![LsEntry {
                name: node.name.clone(),
                is_dir: false,
                size: node.content.len(),
            }]);
        }
        Ok(node
            .children
            .values()
            .filter(|child| all || !child.name.starts_with('.'))
            .map(|child| LsEntry {
                name: child.name.clone(),
                is_dir: child.is_dir,
                size: if child.is_dir { child.children.len() } else { child.content.len() },
            })
            .collect())
    }

    pub fn read_file(&self, path: &str) -> Result<String> {
        let target = self.resolve(path);
        let node = self
            .node(&target)
            .ok_or_else(|| GameError::not_found(path.to_string()))?;
        if node.is_dir {
            return Err(GameError::invalid(format!("{} is a directory", path)));
        }
        Ok(node.content.clone())
    }

    pub fn write_file(&mut self, path: &str, content: &str) -> Result<()> {
        let target = self.resolve(path);
        if target.is_empty() {
            return Err(GameError::invalid("cannot write to /"));
        }
        let (parent_path, name) = split_parent(&target);
        let parent = self
            .root
            .descend_mut(parent_path)
            .ok_or_else(|| GameError::not_found(path.to_string()))?;
        if !parent.is_dir {
            return Err(GameError::invalid(format!("{} is not a directory", format_path(parent_path))));
        }
        match parent.children.get_mut(name) {
            Some(node) if node.is_dir => {
                return Err(GameError::invalid(format!("{} is a directory", path)));
            }
            Some(node) => node.content = content.to_string(),
            None => {
                parent.children.insert(name.to_string(), Node::file(name, content));
            }
        }
        self.emit_save();
        Ok(())
    }

    pub fn touch(&mut self, path: &str) -> Result<()> {
        let target = self.resolve(path);
        if let Some(node) = self.node(&target) {
            if node.is_dir {
                return Err(GameError::invalid(format!("{} is a directory", path)));
            }
            return Ok(());
        }
        self.write_file(path, "")
    }

    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let target = self.resolve(path);
        if target.is_empty() {
            return Err(GameError::AlreadyExists("/".to_string()));
        }
        if self.node(&target).is_some() {
            return Err(GameError::AlreadyExists(path.to_string()));
        }
        let (parent_path, name) = split_parent(&target);
        let parent = self
            .root
            .descend_mut(parent_path)
            .ok_or_else(|| GameError::not_found(format_path(parent_path)))?;
        if !parent.is_dir {
            return Err(GameError::invalid(format!("{} is not a directory", format_path(parent_path))));
        }
        parent.children.insert(name.to_string(), Node::dir(name));
        self.emit_save();
        Ok(())
    }

    pub fn rm(&mut self, path: &str, recursive: bool) -> Result<()> {
        let target = self.resolve(path);
        if target.is_empty() {
            return Err(GameError::denied(STANDARD_NODE_MSG));
        }
        // Skeleton paths are closed under prefix, so one lookup also covers
        // every standard descendant a recursive delete would take out.
        if self.is_standard(&target) {
            return Err(GameError::denied(STANDARD_NODE_MSG));
        }
        let node = self
            .node(&target)
            .ok_or_else(|| GameError::not_found(path.to_string()))?;
        if node.is_dir && !node.children.is_empty() && !recursive {
            return Err(GameError::invalid(format!("{} is not empty", path)));
        }
        let (parent_path, name) = split_parent(&target);
        let parent = self.root.descend_mut(parent_path).expect("parent exists");
        parent.children.remove(name);
        if self.node(&self.cwd).is_none() {
            self.cwd = self.home_path();
            if self.node(&self.cwd).is_none() {
                self.cwd = Vec::new();
            }
        }
        self.emit_save();
        Ok(())
    }

    pub fn cp(&mut self, src: &str, dst: &str) -> Result<()> {
        let src_path = self.resolve(src);
        let node = self
            .node(&src_path)
            .ok_or_else(|| GameError::not_found(src.to_string()))?
            .clone();
        self.place(node, dst)?;
        self.emit_save();
        Ok(())
    }

    pub fn mv(&mut self, src: &str, dst: &str) -> Result<()> {
        let src_path = self.resolve(src);
        if src_path.is_empty() || self.is_standard(&src_path) {
            return Err(GameError::denied(STANDARD_NODE_MSG));
        }
        let dst_path = self.resolve(dst);
        if dst_path.starts_with(&src_path) {
            return Err(GameError::invalid(format!("cannot move {} into itself", src)));
        }
        let node = self
            .node(&src_path)
            .ok_or_else(|| GameError::not_found(src.to_string()))?
            .clone();
        self.place(node, dst)?;
        let (parent_path, name) = split_parent(&src_path);
        let parent = self.root.descend_mut(parent_path).expect("parent exists");
        parent.children.remove(name);
        if self.node(&self.cwd).is_none() {
            self.cwd = self.home_path();
        }
        self.emit_save();
        Ok(())
    }

    /// Drop `node` at `dst`: into an existing directory under its own name,
    /// or at the path itself when the parent exists.
    fn place(&mut self, mut node: Node, dst: &str) -> Result<()> {
        let mut target = self.resolve(dst);
        if let Some(existing) = self.node(&target) {
            if existing.is_dir {
                target.push(node.name.clone());
            } else if node.is_dir {
                return Err(GameError::conflict(format!("{} is not a directory", dst)));
            }
        }
        if self.is_standard(&target) {
            return Err(GameError::denied(STANDARD_NODE_MSG));
        }
        if target.is_empty() {
            return Err(GameError::invalid("cannot replace /"));
        }
        let (parent_path, name) = split_parent(&target);
        let parent = self
            .root
            .descend_mut(parent_path)
            .ok_or_else(|| GameError::not_found(format_path(parent_path)))?;
        if !parent.is_dir {
            return Err(GameError::invalid(format!("{} is not a directory", format_path(parent_path))));
        }
        if let Some(existing) = parent.children.get(name) {
            if existing.is_dir {
                return Err(GameError::AlreadyExists(format_path(&target)));
            }
        }
        node.name = name.to_string();
        parent.children.insert(name.to_string(), node);
        Ok(())
    }

    /// Rename `/home/<old>` to `/home/<new>` after a username change. The
    /// skeleton is rebuilt around the new name so overlay extraction stays
    /// aligned.
    pub fn rename_home_dir(&mut self, new_username: &str) -> Result<()> {
        let old_home = self.home_path();
        let in_home = self.cwd.starts_with(&old_home);
        let home_node = self.root.descend_mut(&["home".to_string()]).expect("home exists");
        if let Some(mut node) = home_node.children.remove(&self.home_user) {
            node.name = new_username.to_string();
            home_node.children.insert(new_username.to_string(), node);
        }
        let skel_home = self.skeleton.descend_mut(&["home".to_string()]).expect("home exists");
        if let Some(mut node) = skel_home.children.remove(&self.home_user) {
            node.name = new_username.to_string();
            skel_home.children.insert(new_username.to_string(), node);
        }
        let old_user = std::mem::replace(&mut self.home_user, new_username.to_string());
        if in_home {
            self.cwd = self
                .cwd
                .iter()
                .map(|p| if *p == old_user { new_username.to_string() } else { p.clone() })
                .collect();
        }
        self.emit_save();
        Ok(())
    }

    /// Register a descriptor for a freshly downloaded tool under
    /// `/usr/bin/<name>`. Descriptors are standard nodes: they join the
    /// skeleton too so they never leak into the overlay.
    pub fn add_user_command(&mut self, name: &str, description: &str) -> Result<()> {
        let usr_bin = vec!["usr".to_string(), "bin".to_string()];
        for tree in [&mut self.root, &mut self.skeleton] {
            let dir = tree.make_dirs(&usr_bin)?;
            dir.children.insert(name.to_string(), Node::file(name, description));
        }
        Ok(())
    }

    /// Look up a command descriptor, `/bin` first, then `/usr/bin`.
    pub fn get_command_description(&self, name: &str) -> Option<String> {
        for dir in [["bin"].as_slice(), ["usr", "bin"].as_slice()] {
            let path: Vec<String> = dir.iter().map(|s| s.to_string()).collect();
            if let Some(node) = self.node(&path).and_then(|d| d.child(name)) {
                if !node.is_dir {
                    return Some(node.content.clone());
                }
            }
        }
        None
    }

    /// Directory and file names under the cwd, for tab completion.
    pub fn entries_for_completion(&self, prefix_dir: &str) -> Vec<String> {
        let target = self.resolve(prefix_dir);
        match self.node(&target) {
            Some(node) if node.is_dir => node
                .children
                .values()
                .map(|c| {
                    if c.is_dir {
                        format!("{}/", c.name)
                    } else {
                        c.name.clone()
                    }
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The non-skeleton subset of the tree, as the persistable overlay map.
    pub fn extract_overlay(&self) -> Value {
        extract(&self.root, Some(&self.skeleton)).unwrap_or_else(|| json!({}))
    }

    /// Merge a persisted overlay onto the tree. Accepts `{content: "..."}`
    /// file shapes and nested directory maps; a file-vs-dir conflict at any
    /// path fails.
    pub fn merge_overlay(&mut self, overlay: &Value) -> Result<()> {
        match overlay {
            Value::Object(map) => merge_into(&mut self.root, map),
            Value::Null => Ok(()),
            _ => Err(GameError::internal("malformed filesystem overlay")),
        }
    }
}

fn build_skeleton(
    username: &str,
    builtin_commands: &[(String, String)],
    tool_commands: &[(String, String)],
) -> Node {
    let mut root = Node::dir("");

    let mut user_home = Node::dir(username);
    user_home
        .children
        .insert("README.txt".to_string(), Node::file("README.txt", README_CONTENT));
    let mut home = Node::dir("home");
    home.children.insert(username.to_string(), user_home);
    root.children.insert("home".to_string(), home);

    let mut bin = Node::dir("bin");
    for (name, description) in builtin_commands {
        bin.children.insert(name.clone(), Node::file(name, description));
    }
    root.children.insert("bin".to_string(), bin);

    let mut usr_bin = Node::dir("bin");
    for (name, description) in tool_commands {
        usr_bin.children.insert(name.clone(), Node::file(name, description));
    }
    let mut usr = Node::dir("usr");
    usr.children.insert("bin".to_string(), usr_bin);
    root.children.insert("usr".to_string(), usr);

    root
}

fn format_path(parts: &[String]) -> String {
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

fn split_parent(path: &[String]) -> (&[String], &str) {
    let (last, parent) = path.split_last().expect("non-empty path");
    (parent, last)
}

fn extract(actual: &Node, skeleton: Option<&Node>) -> Option<Value> {
    if !actual.is_dir {
        let unchanged = skeleton
            .map(|s| !s.is_dir && s.content == actual.content)
            .unwrap_or(false);
        if unchanged {
            return None;
        }
        return Some(json!({ "content": actual.content }));
    }

    let mut map = Map::new();
    for (name, child) in &actual.children {
        let skel_child = skeleton.filter(|s| s.is_dir).and_then(|s| s.child(name));
        if let Some(value) = extract(child, skel_child) {
            map.insert(name.clone(), value);
        }
    }
    if !map.is_empty() || skeleton.is_none() {
        Some(Value::Object(map))
    } else {
        None
    }
}

fn is_file_shape(value: &Value) -> Option<&str> {
    let obj = value.as_object()?;
    if obj.len() == 1 {
        obj.get("content").and_then(Value::as_str)
    } else {
        None
    }
}

fn merge_into(node: &mut Node, overlay: &Map<String, Value>) -> Result<()> {
    for (name, value) in overlay {
        if let Some(content) = is_file_shape(value) {
            match node.children.get_mut(name) {
                Some(existing) if existing.is_dir => {
                    return Err(GameError::conflict(format!(
                        "overlay file {} collides with a directory",
                        name
                    )));
                }
                Some(existing) => existing.content = content.to_string(),
                None => {
                    node.children.insert(name.clone(), Node::file(name, content));
                }
            }
        } else if let Value::Object(children) = value {
            match node.children.get(name) {
                Some(existing) if !existing.is_dir => {
                    return Err(GameError::conflict(format!(
                        "overlay directory {} collides with a file",
                        name
                    )));
                }
                Some(_) => {}
                None => {
                    node.children.insert(name.clone(), Node::dir(name));
                }
            }
            let child = node.children.get_mut(name).expect("just ensured");
            merge_into(child, children)?;
        } else {
            return Err(GameError::internal(format!("malformed overlay entry {}", name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtins() -> Vec<(String, String)> {
        vec![
            ("ls".to_string(), "list directory contents".to_string()),
            ("cd".to_string(), "change directory".to_string()),
        ]
    }

    fn tools() -> Vec<(String, String)> {
        vec![("password_cracker".to_string(), "crack passwords".to_string())]
    }

    fn fresh() -> Vfs {
        Vfs::build("alice", &builtins(), &tools())
    }

    #[test]
    fn test_skeleton_layout() {
        let vfs = fresh();
        assert_eq!(vfs.pwd(), "/home/alice");
        assert!(vfs.read_file("/home/alice/README.txt").unwrap().contains("terminal.sh"));
        assert_eq!(vfs.get_command_description("ls").unwrap(), "list directory contents");
        assert_eq!(vfs.get_command_description("password_cracker").unwrap(), "crack passwords");
        assert!(vfs.get_command_description("nope").is_none());
    }

    #[test]
    fn test_path_resolution() {
        let mut vfs = fresh();
        assert_eq!(vfs.resolve("~"), vec!["home", "alice"]);
        assert_eq!(vfs.resolve("/bin"), vec!["bin"]);
        assert_eq!(vfs.resolve(".."), vec!["home"]);
        assert_eq!(vfs.resolve("../../.."), Vec::<String>::new());
        vfs.cd("/").unwrap();
        assert_eq!(vfs.resolve("home/alice"), vec!["home", "alice"]);
    }

    #[test]
    fn test_mkdir_touch_write_read() {
        let mut vfs = fresh();
        vfs.mkdir("projects").unwrap();
        vfs.cd("projects").unwrap();
        vfs.touch("notes.txt").unwrap();
        vfs.write_file("notes.txt", "remember the milk").unwrap();
        assert_eq!(vfs.read_file("notes.txt").unwrap(), "remember the milk");
        assert_eq!(vfs.pwd(), "/home/alice/projects");

        assert!(matches!(vfs.mkdir("/home/alice/projects"), Err(GameError::AlreadyExists(_))));
        assert!(matches!(vfs.read_file("missing"), Err(GameError::NotFound(_))));
        assert!(matches!(vfs.write_file(".", "x"), Err(GameError::InvalidArgument(_))));
    }

    #[test]
    fn test_ls_hides_dotfiles() {
        let mut vfs = fresh();
        vfs.touch(".secret").unwrap();
        vfs.touch("visible").unwrap();
        let plain: Vec<String> = vfs.ls(None, false).unwrap().into_iter().map(|e| e.name).collect();
        assert!(!plain.contains(&".secret".to_string()));
        assert!(plain.contains(&"visible".to_string()));
        let all: Vec<String> = vfs.ls(None, true).unwrap().into_iter().map(|e| e.name).collect();
        assert!(all.contains(&".secret".to_string()));
    }

    #[test]
    fn test_standard_nodes_are_immutable() {
        let mut vfs = fresh();
        assert!(matches!(vfs.rm("/bin", true), Err(GameError::PermissionDenied(_))));
        assert!(matches!(vfs.rm("/home/alice/README.txt", false), Err(GameError::PermissionDenied(_))));
        assert!(matches!(vfs.mv("/bin/ls", "stolen"), Err(GameError::PermissionDenied(_))));
        // rm -r on a directory holding a standard path is rejected entirely
        assert!(matches!(vfs.rm("/home", true), Err(GameError::PermissionDenied(_))));
    }

    #[test]
    fn test_rm_non_empty_requires_recursive() {
        let mut vfs = fresh();
        vfs.mkdir("d").unwrap();
        vfs.touch("d/f").unwrap();
        assert!(matches!(vfs.rm("d", false), Err(GameError::InvalidArgument(_))));
        vfs.rm("d", true).unwrap();
        assert!(vfs.read_file("d/f").is_err());
    }

    #[test]
    fn test_rm_of_cwd_falls_back_to_home() {
        let mut vfs = fresh();
        vfs.mkdir("d").unwrap();
        vfs.cd("d").unwrap();
        vfs.rm("/home/alice/d", true).unwrap();
        assert_eq!(vfs.pwd(), "/home/alice");
    }

    #[test]
    fn test_cp_and_mv() {
        let mut vfs = fresh();
        vfs.write_file("a.txt", "alpha").unwrap();
        vfs.mkdir("sub").unwrap();
        vfs.cp("a.txt", "sub").unwrap();
        assert_eq!(vfs.read_file("sub/a.txt").unwrap(), "alpha");
        vfs.mv("a.txt", "b.txt").unwrap();
        assert!(vfs.read_file("a.txt").is_err());
        assert_eq!(vfs.read_file("b.txt").unwrap(), "alpha");
        // copying a standard file out is allowed; the source stays put
        vfs.cp("/bin/ls", "lscopy").unwrap();
        assert_eq!(vfs.read_file("lscopy").unwrap(), "list directory contents");
        assert_eq!(vfs.get_command_description("ls").unwrap(), "list directory contents");
    }

    #[test]
    fn test_cd_tilde_rebuilds_missing_home() {
        let mut vfs = fresh();
        // Simulate a home lost from a corrupt overlay by removing it from
        // the raw tree (rm refuses to, it is standard).
        let home = vfs.root.descend_mut(&["home".to_string()]).unwrap();
        home.children.clear();
        vfs.cwd = Vec::new();
        vfs.cd("~").unwrap();
        assert_eq!(vfs.pwd(), "/home/alice");
    }

    #[test]
    fn test_overlay_extract_skips_skeleton() {
        let mut vfs = fresh();
        assert_eq!(vfs.extract_overlay(), json!({}));
        vfs.write_file("~/notes.txt", "hi").unwrap();
        vfs.mkdir("~/empty").unwrap();
        let overlay = vfs.extract_overlay();
        assert_eq!(
            overlay,
            json!({ "home": { "alice": {
                "notes.txt": { "content": "hi" },
                "empty": {}
            }}})
        );
    }

    #[test]
    fn test_overlay_tracks_modified_skeleton_file() {
        let mut vfs = fresh();
        vfs.write_file("/home/alice/README.txt", "mine now").unwrap();
        let overlay = vfs.extract_overlay();
        assert_eq!(
            overlay,
            json!({ "home": { "alice": { "README.txt": { "content": "mine now" } } } })
        );
    }

    #[test]
    fn test_extract_merge_round_trip() {
        let mut vfs = fresh();
        vfs.write_file("~/a.txt", "one").unwrap();
        vfs.mkdir("~/d").unwrap();
        vfs.write_file("~/d/b.txt", "two").unwrap();
        vfs.mkdir("~/d/deep").unwrap();
        let overlay = vfs.extract_overlay();

        let restored = Vfs::load("alice", &builtins(), &tools(), &overlay).unwrap();
        assert_eq!(restored.root, vfs.root);
        // Extract(Merge(Extract(tree))) == Extract(tree)
        assert_eq!(restored.extract_overlay(), overlay);
    }

    #[test]
    fn test_merge_conflict_file_vs_dir() {
        let mut vfs = fresh();
        vfs.mkdir("~/thing").unwrap();
        let overlay = json!({ "home": { "alice": { "thing": { "content": "file now" } } } });
        assert!(matches!(vfs.merge_overlay(&overlay), Err(GameError::Conflict(_))));
    }

    #[test]
    fn test_rename_home_dir() {
        let mut vfs = fresh();
        vfs.write_file("~/keep.txt", "kept").unwrap();
        vfs.rename_home_dir("bob").unwrap();
        assert_eq!(vfs.pwd(), "/home/bob");
        assert_eq!(vfs.read_file("/home/bob/keep.txt").unwrap(), "kept");
        let overlay = vfs.extract_overlay();
        assert_eq!(overlay, json!({ "home": { "bob": { "keep.txt": { "content": "kept" } } } }));
    }

    #[test]
    fn test_save_hook_fires_on_writes() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let mut vfs = fresh();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        vfs.set_save_hook(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        vfs.touch("x").unwrap();
        vfs.write_file("x", "1").unwrap();
        vfs.rm("x", false).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_added_tool_descriptor_stays_out_of_overlay() {
        let mut vfs = fresh();
        vfs.add_user_command("crypto_miner", "mine crypto").unwrap();
        assert_eq!(vfs.get_command_description("crypto_miner").unwrap(), "mine crypto");
        assert_eq!(vfs.extract_overlay(), json!({}));
    }
}
