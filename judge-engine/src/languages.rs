//! Static language registry.
//!
//! One descriptor per supported language: the source filename the worker
//! materializes, the optional compile argv, the run argv, and the resource
//! envelope. Commands name fixed files inside the box, so no placeholder
//! expansion is involved; binaries are addressed by absolute path because
//! the sandbox grants no shell.

/// Global ceilings consulted by request validation, independent of language.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Seconds.
    pub time_limit: f64,
    /// MB.
    pub memory_limit: i64,
}

pub const MAX_LIMITS: Limits = Limits {
    time_limit: 30.0,
    memory_limit: 2048,
};

pub const DEFAULT_LIMITS: Limits = Limits {
    time_limit: 5.0,
    memory_limit: 256,
};

#[derive(Debug, Clone, Copy)]
pub struct LanguageSpec {
    pub key: &'static str,
    pub source_filename: &'static str,
    /// Absent for interpreted languages.
    pub compile_cmd: Option<&'static [&'static str]>,
    pub run_cmd: &'static [&'static str],
    pub default_time_limit: f64,
    pub max_time_limit: f64,
    /// MB.
    pub default_memory_limit: i64,
    /// MB.
    pub max_memory_limit: i64,
    /// Seconds for the compile phase; `None` inherits the engine default.
    pub compile_time_limit: Option<f64>,
    /// Extra environment both phases need (toolchain caches and the like).
    pub env: &'static [(&'static str, &'static str)],
}

static LANGUAGES: &[LanguageSpec] = &[
    LanguageSpec {
        key: "c",
        source_filename: "main.c",
        compile_cmd: Some(&[
            "/usr/bin/gcc", "-O2", "-std=c11", "-o", "main", "main.c", "-lm",
        ]),
        run_cmd: &["./main"],
        default_time_limit: DEFAULT_LIMITS.time_limit,
        max_time_limit: 15.0,
        default_memory_limit: DEFAULT_LIMITS.memory_limit,
        max_memory_limit: 1024,
        compile_time_limit: None,
        env: &[],
    },
    LanguageSpec {
        key: "cpp",
        source_filename: "main.cpp",
        compile_cmd: Some(&[
            "/usr/bin/g++", "-O2", "-std=c++17", "-o", "main", "main.cpp",
        ]),
        run_cmd: &["./main"],
        default_time_limit: DEFAULT_LIMITS.time_limit,
        max_time_limit: 15.0,
        default_memory_limit: DEFAULT_LIMITS.memory_limit,
        max_memory_limit: 1024,
        compile_time_limit: None,
        env: &[],
    },
    LanguageSpec {
        key: "java",
        source_filename: "Main.java",
        compile_cmd: Some(&["/usr/bin/javac", "Main.java"]),
        run_cmd: &["/usr/bin/java", "-XX:+UseSerialGC", "Main"],
        default_time_limit: DEFAULT_LIMITS.time_limit,
        max_time_limit: 15.0,
        default_memory_limit: 512,
        max_memory_limit: 2048,
        compile_time_limit: Some(60.0),
        env: &[],
    },
    LanguageSpec {
        key: "python",
        source_filename: "main.py",
        compile_cmd: None,
        run_cmd: &["/usr/bin/python3", "main.py"],
        default_time_limit: DEFAULT_LIMITS.time_limit,
        max_time_limit: 15.0,
        default_memory_limit: DEFAULT_LIMITS.memory_limit,
        max_memory_limit: 1024,
        compile_time_limit: None,
        env: &[],
    },
    LanguageSpec {
        key: "javascript",
        source_filename: "main.js",
        compile_cmd: None,
        run_cmd: &["/usr/bin/node", "main.js"],
        default_time_limit: DEFAULT_LIMITS.time_limit,
        max_time_limit: 15.0,
        default_memory_limit: DEFAULT_LIMITS.memory_limit,
        max_memory_limit: 1024,
        compile_time_limit: None,
        env: &[],
    },
    LanguageSpec {
        key: "go",
        source_filename: "main.go",
        compile_cmd: Some(&["/usr/bin/go", "build", "-o", "main", "main.go"]),
        run_cmd: &["./main"],
        default_time_limit: DEFAULT_LIMITS.time_limit,
        max_time_limit: 15.0,
        default_memory_limit: 512,
        max_memory_limit: 2048,
        compile_time_limit: Some(60.0),
        env: &[
            ("GOCACHE", "/tmp/.cache/go-build"),
            ("GOPATH", "/tmp/go"),
            ("GO111MODULE", "off"),
        ],
    },
    LanguageSpec {
        key: "rust",
        source_filename: "main.rs",
        compile_cmd: Some(&[
            "/usr/bin/rustc", "-O", "--edition", "2021", "-o", "main", "main.rs",
        ]),
        run_cmd: &["./main"],
        default_time_limit: DEFAULT_LIMITS.time_limit,
        max_time_limit: 15.0,
        default_memory_limit: DEFAULT_LIMITS.memory_limit,
        max_memory_limit: 1024,
        compile_time_limit: None,
        env: &[],
    },
];

pub fn lookup(key: &str) -> Option<&'static LanguageSpec> {
    LANGUAGES.iter().find(|spec| spec.key == key)
}

pub fn all() -> &'static [LanguageSpec] {
    LANGUAGES
}

/// Effective limits for one run: requested values clamped to the language
/// maximum (and floored at zero), language defaults where absent.
pub fn resolve_limits(
    spec: &LanguageSpec,
    requested_time: Option<f64>,
    requested_memory: Option<i64>,
) -> Limits {
    Limits {
        time_limit: requested_time
            .map(|t| t.clamp(0.0, spec.max_time_limit))
            .unwrap_or(spec.default_time_limit),
        memory_limit: requested_memory
            .map(|m| m.clamp(0, spec.max_memory_limit))
            .unwrap_or(spec.default_memory_limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_languages() {
        for key in ["c", "cpp", "java", "python", "javascript", "go", "rust"] {
            assert!(lookup(key).is_some(), "missing language {key}");
        }
        assert!(lookup("cobol").is_none());
        assert!(lookup("Python").is_none());
    }

    #[test]
    fn interpreted_languages_have_no_compile_step() {
        assert!(lookup("python").unwrap().compile_cmd.is_none());
        assert!(lookup("javascript").unwrap().compile_cmd.is_none());
        assert!(lookup("cpp").unwrap().compile_cmd.is_some());
    }

    #[test]
    fn slow_toolchains_carry_their_own_compile_window() {
        assert_eq!(lookup("java").unwrap().compile_time_limit, Some(60.0));
        assert_eq!(lookup("go").unwrap().compile_time_limit, Some(60.0));
        assert!(lookup("c").unwrap().compile_time_limit.is_none());
        assert!(lookup("python").unwrap().compile_time_limit.is_none());
    }

    #[test]
    fn global_defaults_fit_under_the_ceiling() {
        assert!(DEFAULT_LIMITS.time_limit <= MAX_LIMITS.time_limit);
        assert!(DEFAULT_LIMITS.memory_limit <= MAX_LIMITS.memory_limit);
    }

    #[test]
    fn language_maxima_stay_under_global_ceiling() {
        for spec in all() {
            assert!(spec.max_time_limit <= MAX_LIMITS.time_limit, "{}", spec.key);
            assert!(
                spec.max_memory_limit <= MAX_LIMITS.memory_limit,
                "{}",
                spec.key
            );
            assert!(spec.default_time_limit <= spec.max_time_limit);
            assert!(spec.default_memory_limit <= spec.max_memory_limit);
        }
    }

    #[test]
    fn resolve_limits_applies_defaults() {
        let spec = lookup("python").unwrap();
        let limits = resolve_limits(spec, None, None);
        assert_eq!(limits.time_limit, spec.default_time_limit);
        assert_eq!(limits.memory_limit, spec.default_memory_limit);
    }

    #[test]
    fn resolve_limits_clamps_to_language_max() {
        let spec = lookup("c").unwrap();
        let limits = resolve_limits(spec, Some(1000.0), Some(999999));
        assert_eq!(limits.time_limit, spec.max_time_limit);
        assert_eq!(limits.memory_limit, spec.max_memory_limit);

        let limits = resolve_limits(spec, Some(-3.0), Some(-5));
        assert_eq!(limits.time_limit, 0.0);
        assert_eq!(limits.memory_limit, 0);
    }

    #[test]
    fn resolve_limits_keeps_values_in_range() {
        let spec = lookup("java").unwrap();
        let limits = resolve_limits(spec, Some(2.5), Some(128));
        assert_eq!(limits.time_limit, 2.5);
        assert_eq!(limits.memory_limit, 128);
    }
}
