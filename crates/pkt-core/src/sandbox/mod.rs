//! Hook execution.
//!
//! Each hook runs in a fresh Lua state with only the pure standard
//! libraries loaded. Filesystem access goes through a checked `os`
//! capability table; process execution and environment changes are inert.

pub mod container;
pub mod policy;
pub mod privilege;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::{Lua, LuaOptions, StdLib, Table, UserData, UserDataMethods, Value, Variadic};
use thiserror::Error;

use pkt_schema::{Arch, PackageName};

use crate::registry::{Flag, PackageFile};
pub use container::{BuildContainer, container_key};
pub use policy::{Decision, PathPolicy};
pub use privilege::{Credentials, PrivilegeBracket, PrivilegeError};

const MEMORY_LIMIT: usize = 256 * 1024 * 1024;

/// Errors from running a hook script.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The script reached outside its allowed roots.
    #[error("Sandbox violation: {} ({reason})", path.display())]
    Violation {
        /// Offending path.
        path: PathBuf,
        /// Policy decision.
        reason: String,
    },

    /// The script lacks a required hook.
    #[error("Hook script does not define required hook '{0}'")]
    MissingHook(&'static str),

    /// The hook raised a Lua error.
    #[error("Hook '{hook}' failed: {message}")]
    Script {
        /// Hook name.
        hook: &'static str,
        /// Lua error text.
        message: String,
    },

    /// The script failed to load or compile.
    #[error("Could not load hook script: {0}")]
    Load(String),
}

/// Hook functions a script may define.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// Fetches or patches sources.
    Prepare,
    /// Compiles inside the build container.
    Build,
    /// Populates the install and bin directories.
    Install,
    /// Cleans up before files are deleted.
    Remove,
}

impl Hook {
    /// Lua function name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Build => "build",
            Self::Install => "install",
            Self::Remove => "remove",
        }
    }

    /// Only `install` must be defined.
    pub fn is_required(&self) -> bool {
        matches!(self, Self::Install)
    }
}

/// Directories a hook sees, and may write to.
#[derive(Debug, Clone)]
pub struct HookEnv {
    /// Package being processed.
    pub package: PackageName,
    /// The package's own install directory.
    pub data_dir: PathBuf,
    /// Shared executable directory.
    pub bin_dir: PathBuf,
    /// Unpacked artifact.
    pub source_dir: PathBuf,
    /// Scratch directory, also the working directory of relative paths.
    pub work_dir: PathBuf,
    /// Build container, when the package has build dependencies.
    pub build_root: Option<PathBuf>,
}

impl HookEnv {
    fn policy(&self) -> PathPolicy {
        let mut allowed = vec![
            self.data_dir.clone(),
            self.bin_dir.clone(),
            self.work_dir.clone(),
            self.source_dir.clone(),
        ];
        allowed.extend(self.build_root.clone());
        PathPolicy::new(allowed, self.work_dir.clone())
    }
}

/// What a hook did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookOutcome {
    /// The script defined the hook and it ran.
    pub ran: bool,
    /// Paths created through the capability table, sorted.
    pub files: Vec<PackageFile>,
    /// Flags set by the script.
    pub flags: Vec<Flag>,
}

struct HostState {
    policy: PathPolicy,
    created: BTreeMap<PathBuf, bool>,
    flags: Vec<Flag>,
    violation: Option<(PathBuf, String)>,
}

type Shared = Rc<RefCell<HostState>>;

/// Run `hook` from `script` under `env`.
///
/// # Errors
///
/// Returns [`SandboxError::Violation`] if the script touched a denied
/// path (even if it caught the error), [`SandboxError::MissingHook`] for
/// an absent required hook, and [`SandboxError::Script`] for any other
/// Lua error.
pub fn run_hook(
    script: &str,
    script_name: &str,
    hook: Hook,
    env: &HookEnv,
) -> Result<HookOutcome, SandboxError> {
    let state: Shared = Rc::new(RefCell::new(HostState {
        policy: env.policy(),
        created: BTreeMap::new(),
        flags: Vec::new(),
        violation: None,
    }));

    let lua = new_state(&state, env).map_err(|e| SandboxError::Load(e.to_string()))?;

    let loaded = lua.load(script).set_name(format!("@{script_name}")).exec();
    if let Some(violation) = take_violation(&state) {
        return Err(violation);
    }
    loaded.map_err(|e| SandboxError::Load(e.to_string()))?;

    let function: Option<mlua::Function> = lua
        .globals()
        .get(hook.as_str())
        .map_err(|e| SandboxError::Load(e.to_string()))?;
    let Some(function) = function else {
        if hook.is_required() {
            return Err(SandboxError::MissingHook(hook.as_str()));
        }
        tracing::debug!(package = %env.package, hook = hook.as_str(), "hook not defined");
        return Ok(HookOutcome::default());
    };

    tracing::debug!(package = %env.package, hook = hook.as_str(), "running hook");
    let result = function.call::<()>(());

    if let Some(violation) = take_violation(&state) {
        return Err(violation);
    }
    result.map_err(|e| SandboxError::Script {
        hook: hook.as_str(),
        message: e.to_string(),
    })?;

    let mut state = state.borrow_mut();
    Ok(HookOutcome {
        ran: true,
        files: std::mem::take(&mut state.created)
            .into_iter()
            .map(|(path, is_dir)| PackageFile { path, is_dir })
            .collect(),
        flags: std::mem::take(&mut state.flags),
    })
}

fn take_violation(state: &Shared) -> Option<SandboxError> {
    state
        .borrow_mut()
        .violation
        .take()
        .map(|(path, reason)| SandboxError::Violation { path, reason })
}

const PROTECT_GLOBALS: &str = r#"
local consts = ...
setmetatable(_G, {
    __index = consts,
    __newindex = function(t, k, v)
        if consts[k] ~= nil then
            error(tostring(k) .. " is read-only", 2)
        end
        rawset(t, k, v)
    end,
})
"#;

fn new_state(state: &Shared, env: &HookEnv) -> mlua::Result<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE,
        LuaOptions::default(),
    )?;
    lua.set_memory_limit(MEMORY_LIMIT)?;

    let globals = lua.globals();
    for unsafe_fn in ["dofile", "loadfile", "require", "collectgarbage"] {
        globals.set(unsafe_fn, Value::Nil)?;
    }

    let package = env.package.to_string();
    globals.set(
        "print",
        lua.create_function(move |_, args: Variadic<Value>| {
            let line: Vec<String> = args.iter().map(display_value).collect();
            tracing::info!(target: "pkt::hook", package = %package, "{}", line.join("\t"));
            Ok(())
        })?,
    )?;

    let arch = Arch::current();
    let consts = lua.create_table()?;
    consts.set("OS", std::env::consts::OS)?;
    consts.set("ARCH", arch.as_str())?;
    consts.set("ARCH_NORMALIZED", arch.normalized())?;
    consts.set("PACKAGE", env.package.as_str())?;
    consts.set("BIN_DIR", path_str(&env.bin_dir))?;
    consts.set("DATA_DIR", path_str(&env.data_dir))?;
    consts.set("SOURCE_DIR", path_str(&env.source_dir))?;
    consts.set("WORK_DIR", path_str(&env.work_dir))?;
    if let Some(root) = &env.build_root {
        consts.set("BUILD_ROOT", path_str(root))?;
    }
    consts.set(
        "path_join",
        lua.create_function(|_, parts: Variadic<String>| {
            let mut joined = PathBuf::new();
            for part in parts.iter() {
                joined.push(part);
            }
            Ok(path_str(&joined))
        })?,
    )?;

    let flags = Rc::clone(state);
    consts.set(
        "set_flag",
        lua.create_function(move |_, (kind, name, path): (String, String, String)| {
            flags.borrow_mut().flags.push(Flag { kind, name, path });
            Ok(())
        })?,
    )?;

    consts.set("os", capability_table(&lua, state)?)?;

    lua.load(PROTECT_GLOBALS).call::<()>(consts)?;
    Ok(lua)
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().to_string(),
        other => other.type_name().to_string(),
    }
}

/// `(true, nil)` on success, `(nil, message)` on an ordinary IO failure.
type IoReturn = (Option<bool>, Option<String>);

fn io_return(result: std::io::Result<()>) -> IoReturn {
    match result {
        Ok(()) => (Some(true), None),
        Err(e) => (None, Some(e.to_string())),
    }
}

/// Resolve `raw` against the policy, recording and raising a violation.
fn checked(state: &Shared, raw: &str) -> mlua::Result<PathBuf> {
    let mut state = state.borrow_mut();
    let resolved = state.policy.resolve(Path::new(raw));
    match state.policy.check(&resolved) {
        Decision::Allow => Ok(resolved),
        Decision::Deny(reason) => {
            tracing::warn!(path = %resolved.display(), %reason, "sandbox violation");
            let message = format!("access to {raw} denied: {reason}");
            state.violation.get_or_insert((resolved, reason));
            Err(mlua::Error::RuntimeError(message))
        }
    }
}

fn record(state: &Shared, path: &Path, is_dir: bool) {
    state.borrow_mut().created.insert(path.to_path_buf(), is_dir);
}

fn parse_mode(value: Option<Value>, default: u32) -> mlua::Result<u32> {
    match value {
        None | Some(Value::Nil) => Ok(default),
        Some(Value::Integer(i)) => u32::try_from(i)
            .map_err(|_| mlua::Error::RuntimeError(format!("invalid mode {i}"))),
        Some(Value::String(s)) => {
            let text = s.to_str()?;
            let digits = text.trim_start_matches("0o");
            u32::from_str_radix(digits, 8)
                .map_err(|_| mlua::Error::RuntimeError(format!("invalid octal mode '{digits}'")))
        }
        Some(other) => Err(mlua::Error::RuntimeError(format!(
            "mode must be an integer or octal string, got {}",
            other.type_name()
        ))),
    }
}

fn capability_table(lua: &Lua, state: &Shared) -> mlua::Result<Table> {
    let os = lua.create_table()?;

    let st = Rc::clone(state);
    os.set(
        "mkdir",
        lua.create_function(move |_, (path, mode): (String, Option<Value>)| {
            let path = checked(&st, &path)?;
            let mode = parse_mode(mode, 0o755)?;
            let mut fresh = Vec::new();
            let mut cursor = Some(path.as_path());
            while let Some(dir) = cursor {
                if dir.exists() {
                    break;
                }
                fresh.push(dir.to_path_buf());
                cursor = dir.parent();
            }
            let result = std::fs::create_dir_all(&path).and_then(|()| {
                for dir in &fresh {
                    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode))?;
                }
                Ok(())
            });
            for dir in &fresh {
                if dir.is_dir() {
                    record(&st, dir, true);
                }
            }
            Ok(io_return(result))
        })?,
    )?;

    let st = Rc::clone(state);
    os.set(
        "remove",
        lua.create_function(move |_, path: String| {
            let path = checked(&st, &path)?;
            let result = match std::fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&path),
                Ok(_) => std::fs::remove_file(&path),
                Err(e) => Err(e),
            };
            if result.is_ok() {
                st.borrow_mut()
                    .created
                    .retain(|recorded, _| !recorded.starts_with(&path));
            }
            Ok(io_return(result))
        })?,
    )?;

    let st = Rc::clone(state);
    os.set(
        "rename",
        lua.create_function(move |_, (from, to): (String, String)| {
            let from = checked(&st, &from)?;
            let to = checked(&st, &to)?;
            let result = std::fs::rename(&from, &to);
            if result.is_ok() {
                let mut state = st.borrow_mut();
                state.created.retain(|recorded, _| !recorded.starts_with(&from));
                state.created.insert(to.clone(), to.is_dir());
            }
            Ok(io_return(result))
        })?,
    )?;

    let st = Rc::clone(state);
    os.set(
        "copy",
        lua.create_function(move |_, (from, to): (String, String)| {
            let from = checked(&st, &from)?;
            let to = checked(&st, &to)?;
            let mut created = Vec::new();
            let result = copy_tree(&from, &to, &mut created);
            for (path, is_dir) in created {
                record(&st, &path, is_dir);
            }
            Ok(io_return(result))
        })?,
    )?;

    let st = Rc::clone(state);
    os.set(
        "symlink",
        lua.create_function(move |_, (target, link): (String, String)| {
            let link = checked(&st, &link)?;
            let target_path = Path::new(&target);
            let effective = if target_path.is_absolute() {
                target_path.to_path_buf()
            } else {
                link.parent().unwrap_or(Path::new("/")).join(target_path)
            };
            checked(&st, &path_str(&effective))?;
            let result = std::os::unix::fs::symlink(target_path, &link);
            if result.is_ok() {
                record(&st, &link, false);
            }
            Ok(io_return(result))
        })?,
    )?;

    let st = Rc::clone(state);
    os.set(
        "chmod",
        lua.create_function(move |_, (path, mode): (String, Value)| {
            let path = checked(&st, &path)?;
            let mode = parse_mode(Some(mode), 0o644)?;
            Ok(io_return(std::fs::set_permissions(
                &path,
                std::fs::Permissions::from_mode(mode),
            )))
        })?,
    )?;

    let st = Rc::clone(state);
    os.set(
        "open",
        lua.create_function(move |_, (path, mode): (String, Option<String>)| {
            let path = checked(&st, &path)?;
            let mode = mode.unwrap_or_else(|| "r".to_string());
            let mut options = OpenOptions::new();
            let writes = match mode.trim_end_matches('b') {
                "r" => {
                    options.read(true);
                    false
                }
                "w" => {
                    options.write(true).create(true).truncate(true);
                    true
                }
                "a" => {
                    options.append(true).create(true);
                    true
                }
                other => {
                    return Err(mlua::Error::RuntimeError(format!("invalid open mode '{other}'")));
                }
            };
            match options.open(&path) {
                Ok(file) => {
                    if writes {
                        record(&st, &path, false);
                    }
                    Ok((Some(LuaFile { file: Some(file) }), None))
                }
                Err(e) => Ok((None, Some(e.to_string()))),
            }
        })?,
    )?;

    for inert in ["setenv", "execute", "chdir", "exit"] {
        os.set(inert, lua.create_function(|_, _: Variadic<Value>| Ok(()))?)?;
    }
    os.set(
        "getenv",
        lua.create_function(|_, name: String| Ok(std::env::var(name).ok()))?,
    )?;

    Ok(os)
}

fn copy_tree(
    from: &Path,
    to: &Path,
    created: &mut Vec<(PathBuf, bool)>,
) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(from)?;
    if !meta.is_dir() {
        std::fs::copy(from, to)?;
        created.push((to.to_path_buf(), false));
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(from).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let dest = to.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            if !dest.exists() {
                std::fs::create_dir_all(&dest)?;
                created.push((dest, true));
            }
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(target, &dest)?;
            created.push((dest, false));
        } else {
            std::fs::copy(entry.path(), &dest)?;
            created.push((dest, false));
        }
    }
    Ok(())
}

/// File handle returned by `os.open`.
struct LuaFile {
    file: Option<File>,
}

impl LuaFile {
    fn handle(&mut self) -> mlua::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| mlua::Error::RuntimeError("file is closed".into()))
    }
}

impl UserData for LuaFile {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method_mut("read", |lua, this, ()| {
            let mut buf = Vec::new();
            match this.handle()?.read_to_end(&mut buf) {
                Ok(_) => Ok((Some(lua.create_string(&buf)?), None)),
                Err(e) => Ok((None, Some(e.to_string()))),
            }
        });
        methods.add_method_mut("write", |_, this, chunks: Variadic<mlua::String>| {
            let file = this.handle()?;
            for chunk in chunks.iter() {
                if let Err(e) = file.write_all(&chunk.as_bytes()) {
                    return Ok(io_return(Err(e)));
                }
            }
            Ok(io_return(Ok(())))
        });
        methods.add_method_mut("close", |_, this, ()| {
            let result = match this.file.take() {
                Some(mut file) => file.flush(),
                None => Ok(()),
            };
            Ok(io_return(result))
        });
    }
}
