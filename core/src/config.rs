//! Launcher configuration loading and `LaunchSpec` derivation
//!
//! This module layers launcher settings from three sources, lowest precedence
//! first: compiled defaults, a `KEY=VALUE` environment-source file, and the
//! process environment. The result is an explicit [`LauncherSettings`] struct
//! that is passed into the supervisor; nothing here relies on ambient global
//! state.

use crate::{CoreError, Result};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment keys recognized in the env-source file and process environment
pub const ENV_JAVA_HOME: &str = "JAVA_HOME";
/// Directory for PID files
pub const ENV_PID_DIR: &str = "PHAROS_PID_DIR";
/// Directory for output/log files
pub const ENV_LOG_DIR: &str = "PHAROS_LOG_DIR";
/// Extra JVM options, whitespace-separated
pub const ENV_SERVER_OPTS: &str = "PHAROS_SERVER_OPTS";
/// Explicit server jar path
pub const ENV_SERVER_JAR: &str = "PHAROS_SERVER_JAR";

const LAYERED_KEYS: [&str; 5] = [
    ENV_JAVA_HOME,
    ENV_PID_DIR,
    ENV_LOG_DIR,
    ENV_SERVER_OPTS,
    ENV_SERVER_JAR,
];

/// Resolved launcher settings after layering all configuration sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherSettings {
    /// JVM installation root; `None` means use a bare `java` from PATH
    pub java_home: Option<PathBuf>,
    /// Directory that receives the PID file
    pub pid_dir: PathBuf,
    /// Directory that receives the output/log file
    pub log_dir: PathBuf,
    /// Extra JVM options inserted before `-jar`
    pub server_opts: Vec<String>,
    /// Explicit server jar; `None` derives `pharos-<server>.jar`
    pub server_jar: Option<PathBuf>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        let scratch = env::temp_dir().join("pharos");
        Self {
            java_home: None,
            pid_dir: scratch.clone(),
            log_dir: scratch,
            server_opts: Vec::new(),
            server_jar: None,
        }
    }
}

/// Everything the supervisor needs to launch one server instance.
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable to run (the `java` binary)
    pub executable: PathBuf,
    /// Argument vector passed to the executable
    pub args: Vec<String>,
    /// Append-mode file receiving the supervisor's stdout/stderr
    pub output_file: PathBuf,
    /// PID file guarding against duplicate instances
    pub pid_file: PathBuf,
}

impl LauncherSettings {
    /// Load settings by layering defaults, the env-source file (if any), and
    /// the process environment.
    ///
    /// A missing env file is non-fatal; an unreadable or garbled one is a
    /// `Config` error.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        let mut process_env = HashMap::new();
        for key in LAYERED_KEYS {
            if let Ok(value) = env::var(key) {
                process_env.insert(key.to_string(), value);
            }
        }
        Self::load_layered(env_file, &process_env)
    }

    /// Layering core, with the highest-precedence source passed explicitly so
    /// callers (and tests) do not have to mutate the process environment.
    pub fn load_layered(
        env_file: Option<&Path>,
        overrides: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut layered = match env_file {
            Some(path) => source_env_file(path)?,
            None => HashMap::new(),
        };
        for (key, value) in overrides {
            layered.insert(key.clone(), value.clone());
        }

        let mut settings = Self::default();
        if let Some(home) = non_empty(&layered, ENV_JAVA_HOME) {
            settings.java_home = Some(PathBuf::from(home));
        }
        if let Some(dir) = non_empty(&layered, ENV_PID_DIR) {
            settings.pid_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty(&layered, ENV_LOG_DIR) {
            settings.log_dir = PathBuf::from(dir);
        }
        if let Some(opts) = non_empty(&layered, ENV_SERVER_OPTS) {
            settings.server_opts = opts.split_whitespace().map(str::to_string).collect();
        }
        if let Some(jar) = non_empty(&layered, ENV_SERVER_JAR) {
            settings.server_jar = Some(PathBuf::from(jar));
        }
        debug!("Launcher settings resolved: {:?}", settings);
        Ok(settings)
    }

    /// Derive the immutable [`LaunchSpec`] for one server flavor.
    ///
    /// The java executable is `<java_home>/bin/java` when a JVM root is
    /// configured, otherwise a bare `java` resolved from PATH. Output and PID
    /// paths follow the `pharos-<user>-<server>.{out,pid}` basename pattern.
    pub fn launch_spec(&self, server: &str) -> Result<LaunchSpec> {
        if server.trim().is_empty() {
            return Err(CoreError::Config("server name cannot be empty".to_string()));
        }

        let executable = match &self.java_home {
            Some(home) => home.join("bin").join("java"),
            None => PathBuf::from("java"),
        };

        let jar = self
            .server_jar
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("pharos-{server}.jar")));

        let mut args = self.server_opts.clone();
        args.push("-jar".to_string());
        args.push(jar.display().to_string());

        let basename = format!("pharos-{}-{}", invoking_user(), server);
        let output_file = absolutize(self.log_dir.join(format!("{basename}.out")))?;
        let pid_file = absolutize(self.pid_dir.join(format!("{basename}.pid")))?;

        Ok(LaunchSpec {
            executable,
            args,
            output_file,
            pid_file,
        })
    }
}

fn non_empty<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
}

/// Parse a `KEY=VALUE` environment-source file into a map.
/// A file that does not exist yields an empty map.
///
/// The file format follows shell-sourced env files: blank lines and `#`
/// comments are skipped, quoting works as in dotenv files, and an unquoted
/// value keeps everything after the first `=`, spaces included. The last
/// point matters for `PHAROS_SERVER_OPTS`, which carries whitespace-separated
/// JVM options.
fn source_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        debug!("Env file {} not found, using defaults", path.display());
        return Ok(HashMap::new());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| CoreError::Config(format!("failed to read env file {}: {e}", path.display())))?;

    let mut vars = HashMap::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_env_line(trimmed) {
            Some((key, value)) => {
                vars.insert(key, value);
            }
            None => {
                return Err(CoreError::Config(format!(
                    "malformed line in env file {}: '{trimmed}'",
                    path.display()
                )));
            }
        }
    }
    Ok(vars)
}

/// Parse one non-blank, non-comment line. Quoted and escaped values go
/// through the dotenv parser; the dotenv dialect rejects unquoted values
/// containing spaces, so those fall back to a split on the first `=`.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    if let Some(Ok(pair)) = dotenvy::from_read_iter(std::io::Cursor::new(line)).next() {
        return Some(pair);
    }

    let unprefixed = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = unprefixed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

/// Name of the invoking user, used in the output/PID basename.
/// Never empty: falls back from the passwd entry to `$USER` to the raw uid.
fn invoking_user() -> String {
    #[cfg(unix)]
    {
        let uid = nix::unistd::getuid();
        match nix::unistd::User::from_uid(uid) {
            Ok(Some(user)) if !user.name.is_empty() => return user.name,
            Ok(_) => {}
            Err(e) => warn!("Failed to look up user for uid {}: {}", uid, e),
        }
        env::var("USER")
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| uid.to_string())
    }
    #[cfg(not(unix))]
    {
        env::var("USERNAME")
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_point_at_scratch_dirs() {
        let settings = LauncherSettings::default();
        assert!(settings.java_home.is_none());
        assert_eq!(settings.pid_dir, settings.log_dir);
        assert!(settings.pid_dir.ends_with("pharos"));
    }

    #[test]
    fn env_file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env_path = dir.path().join("pharos-env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "JAVA_HOME=/opt/jdk").unwrap();
        writeln!(f, "PHAROS_LOG_DIR=/var/log/pharos").unwrap();
        writeln!(f, "PHAROS_SERVER_OPTS=-Xmx512m -DasyncLogging=true").unwrap();
        drop(f);

        let settings =
            LauncherSettings::load_layered(Some(&env_path), &HashMap::new()).expect("load");
        assert_eq!(settings.java_home, Some(PathBuf::from("/opt/jdk")));
        assert_eq!(settings.log_dir, PathBuf::from("/var/log/pharos"));
        assert_eq!(
            settings.server_opts,
            vec!["-Xmx512m".to_string(), "-DasyncLogging=true".to_string()]
        );
        // not set in the file, default stands
        assert!(settings.pid_dir.ends_with("pharos"));
    }

    #[test]
    fn unquoted_multi_token_values_survive_sourcing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env_path = dir.path().join("pharos-env");
        std::fs::write(
            &env_path,
            "# launcher options\nexport PHAROS_SERVER_OPTS=-Xmx1g -XX:+UseG1GC -Dlog4j.debug\n",
        )
        .unwrap();

        let settings =
            LauncherSettings::load_layered(Some(&env_path), &HashMap::new()).expect("load");
        assert_eq!(
            settings.server_opts,
            vec![
                "-Xmx1g".to_string(),
                "-XX:+UseG1GC".to_string(),
                "-Dlog4j.debug".to_string()
            ]
        );
    }

    #[test]
    fn quoted_values_are_unquoted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env_path = dir.path().join("pharos-env");
        std::fs::write(&env_path, "PHAROS_SERVER_OPTS=\"-Xmx512m -Xms256m\"\n").unwrap();

        let settings =
            LauncherSettings::load_layered(Some(&env_path), &HashMap::new()).expect("load");
        assert_eq!(
            settings.server_opts,
            vec!["-Xmx512m".to_string(), "-Xms256m".to_string()]
        );
    }

    #[test]
    fn line_without_separator_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env_path = dir.path().join("pharos-env");
        std::fs::write(&env_path, "JAVA_HOME /opt/jdk\n").unwrap();

        let err = LauncherSettings::load_layered(Some(&env_path), &HashMap::new()).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn process_env_overrides_env_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env_path = dir.path().join("pharos-env");
        std::fs::write(&env_path, "PHAROS_PID_DIR=/from/file\n").unwrap();

        let settings = LauncherSettings::load_layered(
            Some(&env_path),
            &overrides(&[(ENV_PID_DIR, "/from/process")]),
        )
        .expect("load");
        assert_eq!(settings.pid_dir, PathBuf::from("/from/process"));
    }

    #[test]
    fn missing_env_file_is_not_fatal() {
        let settings =
            LauncherSettings::load_layered(Some(Path::new("/no/such/env-file")), &HashMap::new())
                .expect("load");
        assert_eq!(settings, LauncherSettings::default());
    }

    #[test]
    fn empty_values_are_ignored() {
        let settings =
            LauncherSettings::load_layered(None, &overrides(&[(ENV_JAVA_HOME, "  ")])).expect("load");
        assert!(settings.java_home.is_none());
    }

    #[test]
    fn launch_spec_derives_paths_and_argv() {
        let settings = LauncherSettings {
            java_home: Some(PathBuf::from("/opt/jdk")),
            pid_dir: PathBuf::from("/run/pharos"),
            log_dir: PathBuf::from("/var/log/pharos"),
            server_opts: vec!["-Xmx512m".to_string()],
            server_jar: Some(PathBuf::from("/opt/pharos/server.jar")),
        };
        let spec = settings.launch_spec("traceserver").expect("spec");

        assert_eq!(spec.executable, PathBuf::from("/opt/jdk/bin/java"));
        assert_eq!(
            spec.args,
            vec![
                "-Xmx512m".to_string(),
                "-jar".to_string(),
                "/opt/pharos/server.jar".to_string()
            ]
        );

        let out = spec.output_file.to_string_lossy().into_owned();
        let pid = spec.pid_file.to_string_lossy().into_owned();
        assert!(out.starts_with("/var/log/pharos/pharos-"));
        assert!(out.ends_with("-traceserver.out"));
        assert!(pid.starts_with("/run/pharos/pharos-"));
        assert!(pid.ends_with("-traceserver.pid"));
    }

    #[test]
    fn bare_java_without_java_home() {
        let spec = LauncherSettings::default()
            .launch_spec("queryserver")
            .expect("spec");
        assert_eq!(spec.executable, PathBuf::from("java"));
        assert_eq!(spec.args[spec.args.len() - 2], "-jar");
        assert!(spec.args.last().unwrap().ends_with("pharos-queryserver.jar"));
    }

    #[test]
    fn empty_server_name_is_rejected() {
        let err = LauncherSettings::default().launch_spec(" ").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn relative_dirs_are_resolved() {
        let settings = LauncherSettings {
            pid_dir: PathBuf::from("run"),
            log_dir: PathBuf::from("log"),
            ..LauncherSettings::default()
        };
        let spec = settings.launch_spec("traceserver").expect("spec");
        assert!(spec.output_file.is_absolute());
        assert!(spec.pid_file.is_absolute());
    }
}
