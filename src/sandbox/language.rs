use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::ExecError;

/// Mount point of the read-only workspace inside the container
pub const SOURCE_MOUNT: &str = "/code";
/// Writable scratch area inside the container (tmpfs)
pub const SCRATCH_DIR: &str = "/tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Ruby,
    Bash,
    C,
    Cpp,
    Java,
    Go,
    Rust,
}

impl Language {
    pub const ALL: [Language; 9] = [
        Language::Python,
        Language::JavaScript,
        Language::Ruby,
        Language::Bash,
        Language::C,
        Language::Cpp,
        Language::Java,
        Language::Go,
        Language::Rust,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Ruby => "ruby",
            Self::Bash => "bash",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Java => "java",
            Self::Go => "go",
            Self::Rust => "rust",
        }
    }

    pub fn profile(&self) -> &'static LanguageProfile {
        // PROFILES is declared in the same order as the enum
        &PROFILES[*self as usize]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let language = match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Self::Python,
            "javascript" | "js" | "node" => Self::JavaScript,
            "ruby" | "rb" => Self::Ruby,
            "bash" | "sh" | "shell" => Self::Bash,
            "c" => Self::C,
            "cpp" | "c++" | "cxx" => Self::Cpp,
            "java" => Self::Java,
            "go" | "golang" => Self::Go,
            "rust" | "rs" => Self::Rust,
            _ => return Err(ExecError::UnsupportedLanguage(s.to_string())),
        };
        Ok(language)
    }
}

/// How a profile turns its source file into a running process.
#[derive(Debug)]
pub enum Toolchain {
    /// Interpreter argv; the mounted source path is appended.
    Interpreter(&'static [&'static str]),
    /// Shell fragments run inside the scratch area after the source was copied there.
    Compiler {
        build: &'static str,
        run: &'static str,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageProfile {
    pub id: Language,
    pub file_name: &'static str,
    pub image: &'static str,
    #[serde(skip)]
    pub toolchain: Toolchain,
    #[serde(skip)]
    pub env: &'static [(&'static str, &'static str)],
}

impl LanguageProfile {
    /// Path of the source file as seen from inside the container
    pub fn mounted_source(&self) -> String {
        format!("{SOURCE_MOUNT}/{}", self.file_name)
    }

    /// Argv executed inside the container.
    ///
    /// Only constants and the profile's fixed file name end up in here.
    pub fn command(&self) -> Vec<String> {
        match &self.toolchain {
            Toolchain::Interpreter(argv) => argv
                .iter()
                .map(|s| s.to_string())
                .chain(std::iter::once(self.mounted_source()))
                .collect(),
            Toolchain::Compiler { build, run } => {
                let script = format!(
                    "cp {src} {SCRATCH_DIR}/{file} && cd {SCRATCH_DIR} && {build} && exec {run}",
                    src = self.mounted_source(),
                    file = self.file_name,
                );
                vec!["sh".to_string(), "-c".to_string(), script]
            }
        }
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.toolchain, Toolchain::Compiler { .. })
    }
}

static PROFILES: [LanguageProfile; 9] = [
    LanguageProfile {
        id: Language::Python,
        file_name: "main.py",
        image: "python:3.12-slim",
        toolchain: Toolchain::Interpreter(&["python3", "-u"]),
        env: &[("PYTHONDONTWRITEBYTECODE", "1")],
    },
    LanguageProfile {
        id: Language::JavaScript,
        file_name: "main.js",
        image: "node:20-alpine",
        toolchain: Toolchain::Interpreter(&["node"]),
        env: &[],
    },
    LanguageProfile {
        id: Language::Ruby,
        file_name: "main.rb",
        image: "ruby:3.3-alpine",
        toolchain: Toolchain::Interpreter(&["ruby"]),
        env: &[],
    },
    LanguageProfile {
        id: Language::Bash,
        file_name: "main.sh",
        image: "bash:5.2",
        toolchain: Toolchain::Interpreter(&["bash"]),
        env: &[],
    },
    LanguageProfile {
        id: Language::C,
        file_name: "main.c",
        image: "gcc:13",
        toolchain: Toolchain::Compiler {
            build: "gcc -O2 -o main main.c -lm",
            run: "./main",
        },
        env: &[],
    },
    LanguageProfile {
        id: Language::Cpp,
        file_name: "main.cpp",
        image: "gcc:13",
        toolchain: Toolchain::Compiler {
            build: "g++ -O2 -std=c++17 -o main main.cpp",
            run: "./main",
        },
        env: &[],
    },
    LanguageProfile {
        id: Language::Java,
        file_name: "Main.java",
        image: "eclipse-temurin:21-jdk",
        toolchain: Toolchain::Compiler {
            build: "javac -J-Xmx160m Main.java",
            run: "java -Xmx160m -XX:+UseSerialGC -cp . Main",
        },
        env: &[],
    },
    LanguageProfile {
        id: Language::Go,
        file_name: "main.go",
        image: "golang:1.22-alpine",
        toolchain: Toolchain::Compiler {
            build: "go build -o main main.go",
            run: "./main",
        },
        env: &[("GOCACHE", "/tmp/.gocache"), ("GOPATH", "/tmp/go")],
    },
    LanguageProfile {
        id: Language::Rust,
        file_name: "main.rs",
        image: "rust:1.79-slim",
        toolchain: Toolchain::Compiler {
            build: "rustc -O -o main main.rs",
            run: "./main",
        },
        env: &[],
    },
];

/// Look up the profile for a user-supplied language identifier
pub fn resolve(language_id: &str) -> Result<&'static LanguageProfile, ExecError> {
    language_id.parse::<Language>().map(|l| l.profile())
}

pub fn profiles() -> &'static [LanguageProfile] {
    &PROFILES
}
