//! Language profiles and the read-only registry that resolves them.
//!
//! A profile is pure data: command templates plus a couple of flags. The
//! launcher consumes it generically, so adding a language never needs a new
//! code path, only a new profile (built in or supplied through configuration).

use coderun_proto::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[cfg(windows)]
const PYTHON: &str = "python";
#[cfg(not(windows))]
const PYTHON: &str = "python3";

/// What the `{target}` placeholder of a run template addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTarget {
    /// The staged source file (interpreted languages).
    #[default]
    Source,
    /// The binary produced by the build step.
    Binary,
    /// A logical name derived from the file stem (e.g. a JVM class name).
    LogicalName,
}

/// Immutable description of how to build and run one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Lowercase extensions including the leading dot.
    pub extensions: BTreeSet<String>,
    #[serde(default)]
    pub build_command: Option<String>,
    pub run_command: String,
    #[serde(default)]
    pub has_build_step: bool,
    #[serde(default = "default_true")]
    pub supports_input: bool,
    #[serde(default)]
    pub run_target: RunTarget,
    /// Extension of a file the build step generates next to the source.
    #[serde(default)]
    pub intermediate_extension: Option<String>,
    pub default_file_name: String,
    #[serde(default)]
    pub template: String,
}

fn default_true() -> bool {
    true
}

impl LanguageProfile {
    /// Checks the shape of a profile supplied through configuration.
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(Error::Config("language profile with empty key".to_string()));
        }
        if self.run_command.split_whitespace().next().is_none() {
            return Err(Error::Config(format!(
                "language {} has an empty run command",
                self.key
            )));
        }
        if let Some(ext) = self.extensions.iter().find(|ext| !ext.starts_with('.')) {
            return Err(Error::Config(format!(
                "language {}: extension {ext:?} must start with '.'",
                self.key
            )));
        }
        Ok(())
    }

    /// True if `name` is this profile's key or one of its aliases.
    pub fn answers_to(&self, name: &str) -> bool {
        self.key.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(name))
    }
}

/// Process-wide, read-only lookup of language profiles.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: Vec<Arc<LanguageProfile>>,
    by_name: HashMap<String, usize>,
}

impl ProfileRegistry {
    /// Registry containing only the built-in profiles.
    pub fn builtin() -> Self {
        Self::from_profiles(builtin_profiles())
    }

    /// Builds a registry; later profiles replace earlier ones with the same key.
    pub fn from_profiles(profiles: impl IntoIterator<Item = LanguageProfile>) -> Self {
        let mut registry = Self::default();
        for profile in profiles {
            registry.insert(profile);
        }
        registry
    }

    /// Built-in profiles overlaid with `overrides` (validated first).
    pub fn with_overrides(overrides: &[LanguageProfile]) -> Result<Self> {
        let mut registry = Self::builtin();
        for profile in overrides {
            profile.validate()?;
            registry.insert(profile.clone());
        }
        Ok(registry)
    }

    fn insert(&mut self, mut profile: LanguageProfile) {
        profile.extensions = profile
            .extensions
            .iter()
            .map(|ext| ext.to_ascii_lowercase())
            .collect();

        let key = profile.key.to_ascii_lowercase();
        // Match on keys only; a key that equals another profile's alias
        // takes that alias over instead of replacing the profile.
        let existing = self
            .profiles
            .iter()
            .position(|current| current.key.eq_ignore_ascii_case(&key));
        let index = match existing {
            Some(index) => {
                // Drop aliases of the profile being replaced.
                self.by_name.retain(|_, slot| *slot != index);
                self.profiles[index] = Arc::new(profile);
                index
            }
            None => {
                self.profiles.push(Arc::new(profile));
                self.profiles.len() - 1
            }
        };

        let profile = &self.profiles[index];
        for alias in &profile.aliases {
            self.by_name
                .entry(alias.to_ascii_lowercase())
                .or_insert(index);
        }
        self.by_name.insert(key, index);
    }

    /// Looks a profile up by key or alias, case-insensitively.
    pub fn resolve(&self, key: &str) -> Result<Arc<LanguageProfile>> {
        self.by_name
            .get(&key.trim().to_ascii_lowercase())
            .map(|&index| Arc::clone(&self.profiles[index]))
            .ok_or_else(|| Error::UnknownLanguage(key.to_string()))
    }

    /// Picks the profile whose extension is the longest suffix of `file_name`.
    pub fn detect(&self, file_name: &str) -> Option<Arc<LanguageProfile>> {
        let lower = file_name.to_ascii_lowercase();
        self.profiles
            .iter()
            .filter_map(|profile| {
                profile
                    .extensions
                    .iter()
                    .filter(|ext| lower.len() > ext.len() && lower.ends_with(ext.as_str()))
                    .map(String::len)
                    .max()
                    .map(|len| (len, profile))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, profile)| Arc::clone(profile))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LanguageProfile>> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn exts(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|ext| (*ext).to_string()).collect()
}

fn aliases(list: &[&str]) -> Vec<String> {
    list.iter().map(|alias| (*alias).to_string()).collect()
}

fn compiled(
    key: &str,
    display_name: &str,
    extensions: &[&str],
    build: &str,
    default_file_name: &str,
    template: &str,
) -> LanguageProfile {
    LanguageProfile {
        key: key.to_string(),
        display_name: display_name.to_string(),
        aliases: Vec::new(),
        extensions: exts(extensions),
        build_command: Some(build.to_string()),
        run_command: "{target}".to_string(),
        has_build_step: true,
        supports_input: true,
        run_target: RunTarget::Binary,
        intermediate_extension: None,
        default_file_name: default_file_name.to_string(),
        template: template.to_string(),
    }
}

fn interpreted(
    key: &str,
    display_name: &str,
    extensions: &[&str],
    run: &str,
    default_file_name: &str,
    template: &str,
) -> LanguageProfile {
    LanguageProfile {
        key: key.to_string(),
        display_name: display_name.to_string(),
        aliases: Vec::new(),
        extensions: exts(extensions),
        build_command: None,
        run_command: run.to_string(),
        has_build_step: false,
        supports_input: true,
        run_target: RunTarget::Source,
        intermediate_extension: None,
        default_file_name: default_file_name.to_string(),
        template: template.to_string(),
    }
}

/// The profiles shipped with coderun.
pub fn builtin_profiles() -> Vec<LanguageProfile> {
    vec![
        compiled(
            "c",
            "C",
            &[".c"],
            "gcc {source} -o {output}",
            "main.c",
            C_TEMPLATE,
        ),
        LanguageProfile {
            aliases: aliases(&["c++", "cxx", "cc"]),
            ..compiled(
                "cpp",
                "C++",
                &[".cpp", ".cc", ".cxx", ".c++"],
                "g++ {source} -o {output}",
                "main.cpp",
                CPP_TEMPLATE,
            )
        },
        LanguageProfile {
            aliases: aliases(&["rs"]),
            ..compiled(
                "rust",
                "Rust",
                &[".rs"],
                "rustc {source} -o {output}",
                "main.rs",
                RUST_TEMPLATE,
            )
        },
        LanguageProfile {
            aliases: aliases(&["golang"]),
            ..compiled(
                "go",
                "Go",
                &[".go"],
                "go build -o {output} {source}",
                "main.go",
                GO_TEMPLATE,
            )
        },
        LanguageProfile {
            key: "java".to_string(),
            display_name: "Java".to_string(),
            aliases: Vec::new(),
            extensions: exts(&[".java"]),
            build_command: Some("javac -d {dir} {source}".to_string()),
            run_command: "java -cp {dir} {target}".to_string(),
            has_build_step: true,
            supports_input: true,
            run_target: RunTarget::LogicalName,
            intermediate_extension: Some(".class".to_string()),
            default_file_name: "Main.java".to_string(),
            template: JAVA_TEMPLATE.to_string(),
        },
        LanguageProfile {
            aliases: aliases(&["py"]),
            ..interpreted(
                "python",
                "Python",
                &[".py"],
                &format!("{PYTHON} -u {{source}}"),
                "main.py",
                PYTHON_TEMPLATE,
            )
        },
        LanguageProfile {
            aliases: aliases(&["js", "node"]),
            ..interpreted(
                "javascript",
                "JavaScript",
                &[".js", ".mjs", ".cjs"],
                "node {source}",
                "main.js",
                JAVASCRIPT_TEMPLATE,
            )
        },
        LanguageProfile {
            key: "typescript".to_string(),
            display_name: "TypeScript".to_string(),
            aliases: aliases(&["ts"]),
            extensions: exts(&[".ts"]),
            build_command: Some("tsc --outDir {dir} {source}".to_string()),
            run_command: "node {intermediate}".to_string(),
            has_build_step: true,
            supports_input: true,
            run_target: RunTarget::Source,
            intermediate_extension: Some(".js".to_string()),
            default_file_name: "main.ts".to_string(),
            template: TYPESCRIPT_TEMPLATE.to_string(),
        },
        LanguageProfile {
            aliases: aliases(&["rb"]),
            ..interpreted(
                "ruby",
                "Ruby",
                &[".rb"],
                "ruby {source}",
                "main.rb",
                RUBY_TEMPLATE,
            )
        },
        LanguageProfile {
            aliases: aliases(&["sh", "bash"]),
            ..interpreted(
                "shell",
                "Shell",
                &[".sh"],
                "sh {source}",
                "main.sh",
                SHELL_TEMPLATE,
            )
        },
    ]
}

const C_TEMPLATE: &str = r#"#include <stdio.h>

int main(void) {
    char name[64];
    printf("Enter your name: ");
    fflush(stdout);
    if (scanf("%63s", name) == 1) {
        printf("Hello, %s!\n", name);
    }
    return 0;
}
"#;

const CPP_TEMPLATE: &str = r#"#include <iostream>
#include <string>

int main() {
    std::string name;
    std::cout << "Enter your name: " << std::flush;
    std::getline(std::cin, name);
    std::cout << "Hello, " << name << "!" << std::endl;
    return 0;
}
"#;

const RUST_TEMPLATE: &str = r#"use std::io::{self, Write};

fn main() {
    print!("Enter your name: ");
    io::stdout().flush().unwrap();
    let mut name = String::new();
    io::stdin().read_line(&mut name).unwrap();
    println!("Hello, {}!", name.trim());
}
"#;

const GO_TEMPLATE: &str = r#"package main

import (
	"bufio"
	"fmt"
	"os"
	"strings"
)

func main() {
	fmt.Print("Enter your name: ")
	name, _ := bufio.NewReader(os.Stdin).ReadString('\n')
	fmt.Printf("Hello, %s!\n", strings.TrimSpace(name))
}
"#;

const JAVA_TEMPLATE: &str = r#"import java.util.Scanner;

public class Main {
    public static void main(String[] args) {
        Scanner scanner = new Scanner(System.in);
        System.out.print("Enter your name: ");
        System.out.flush();
        String name = scanner.nextLine();
        System.out.println("Hello, " + name + "!");
    }
}
"#;

const PYTHON_TEMPLATE: &str = r#"name = input("Enter your name: ")
print(f"Hello, {name}!")
"#;

const JAVASCRIPT_TEMPLATE: &str = r#"const readline = require("readline");

const rl = readline.createInterface({ input: process.stdin, output: process.stdout });
rl.question("Enter your name: ", (name) => {
  console.log(`Hello, ${name}!`);
  rl.close();
});
"#;

// Plain `tsc` has no Node typings without `@types/node`, so the template
// stays a script and reaches `process` through `globalThis`.
const TYPESCRIPT_TEMPLATE: &str = r#"const proc = (globalThis as any).process;

proc.stdout.write("Enter your name: ");
proc.stdin.setEncoding("utf8");
proc.stdin.once("data", (chunk: string) => {
  const name = chunk.split(/\r?\n/)[0];
  console.log(`Hello, ${name}!`);
  proc.stdin.pause();
});
"#;

const RUBY_TEMPLATE: &str = r#"$stdout.sync = true
print "Enter your name: "
name = gets.to_s.chomp
puts "Hello, #{name}!"
"#;

const SHELL_TEMPLATE: &str = r#"printf 'Enter your name: '
read -r name
echo "Hello, $name!"
"#;
