//! Interactive REPL (Read-Eval-Print Loop) for the sidewinder runtime

use crate::runtime::{ModuleState, Runtime, RuntimeConfig, RuntimeError, RuntimeResult};
use colored::Colorize;
use std::io::{self, BufRead, Write};

/// REPL configuration
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Prompt string
    pub prompt: String,
    /// Continuation prompt for multiline input
    pub continuation_prompt: String,
    /// Whether to show the result of each evaluation
    pub show_result: bool,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "sidewinder> ".to_string(),
            continuation_prompt: "        ... ".to_string(),
            show_result: true,
        }
    }
}

/// Interactive REPL over one [`Runtime`]
pub struct Repl {
    runtime: Runtime,
    config: ReplConfig,
}

impl Repl {
    /// Create a REPL. Lines share one global scope, so declarations persist.
    pub fn new(mut runtime_config: RuntimeConfig, config: ReplConfig) -> RuntimeResult<Self> {
        runtime_config.scoped_evaluation = false;
        Ok(Self {
            runtime: Runtime::with_config(runtime_config)?,
            config,
        })
    }

    fn print_banner(&self) {
        println!(
            "{} {} {}",
            "sidewinder".cyan().bold(),
            env!("CARGO_PKG_VERSION").green(),
            format!("(cwd: {})", self.runtime.cwd().display()).dimmed()
        );
        println!("Type {} for help, {} to exit", ".help".yellow(), ".exit".yellow());
        println!();
    }

    fn print_help(&self) {
        println!("{}", "Available commands:".bold());
        println!("  {}     - Show this help message", ".help".yellow());
        println!("  {}    - Clear the screen", ".clear".yellow());
        println!("  {}  - List loaded modules", ".modules".yellow());
        println!("  {}     - Show runtime info", ".info".yellow());
        println!("  {}     - Exit the REPL", ".exit".yellow());
        println!();
        println!("{}", "Tips:".bold());
        println!("  - require() resolves relative to the working directory");
        println!("  - Multi-line input: end line with {{ or \\");
        println!();
    }

    fn print_info(&self) {
        let config = self.runtime.config();
        println!("{}", "Runtime Information:".bold());
        println!("  Engine: Boa JavaScript Engine v0.21");
        println!("  Runtime: sidewinder v{}", env!("CARGO_PKG_VERSION"));
        println!("  Working directory: {}", config.cwd.display());
        println!("  Node compatibility: {}", config.enable_node_compat);
        println!("  Resolution mode: {:?}", config.resolver.mode);
        println!();
    }

    fn print_modules(&self) {
        let modules = self.runtime.modules();
        if modules.is_empty() {
            println!("{}", "No modules loaded".dimmed());
            return;
        }
        for module in modules {
            let state = match module.state {
                ModuleState::Loaded => "loaded".green(),
                ModuleState::Loading => "loading".yellow(),
                ModuleState::Failed => "failed".red(),
                ModuleState::Unloaded => "unloaded".dimmed(),
            };
            println!("  {state:>8}  {}", module.path.display());
        }
    }

    /// Check if input is complete (not waiting for more lines)
    fn is_complete(&self, input: &str) -> bool {
        let open_braces = input.matches('{').count();
        let close_braces = input.matches('}').count();
        let open_parens = input.matches('(').count();
        let close_parens = input.matches(')').count();
        let open_brackets = input.matches('[').count();
        let close_brackets = input.matches(']').count();

        open_braces <= close_braces
            && open_parens <= close_parens
            && open_brackets <= close_brackets
            && !input.trim().ends_with('\\')
    }

    /// Process a REPL command (starts with .)
    fn process_command(&mut self, command: &str) -> bool {
        match command.trim() {
            ".exit" | ".quit" | ".q" => return false,
            ".help" | ".h" => self.print_help(),
            ".clear" | ".cls" => {
                print!("\x1B[2J\x1B[1;1H");
                let _ = io::stdout().flush();
            }
            ".info" => self.print_info(),
            ".modules" => self.print_modules(),
            cmd => {
                println!(
                    "{}: Unknown command '{}'. Type .help for available commands.",
                    "Error".red(),
                    cmd
                );
            }
        }
        true
    }

    fn evaluate(&mut self, code: &str) {
        match self.runtime.evaluate(code) {
            Ok(value) => {
                if self.config.show_result && !value.is_undefined() {
                    println!("{} {}", "=>".green(), value);
                }
            }
            Err(e) => {
                println!("{}: {}", "Error".red(), e);
            }
        }
    }

    /// Run the interactive REPL
    pub fn run(&mut self) -> RuntimeResult<()> {
        self.print_banner();

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut input_buffer = String::new();
        let mut in_multiline = false;

        loop {
            let prompt = if in_multiline {
                &self.config.continuation_prompt
            } else {
                &self.config.prompt
            };
            print!("{}", prompt.cyan());
            stdout.flush().map_err(RuntimeError::IoError)?;

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => {
                    println!();
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    println!("{}: Failed to read input: {}", "Error".red(), e);
                    continue;
                }
            }

            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() && !in_multiline {
                continue;
            }

            if line.starts_with('.') && !in_multiline {
                if !self.process_command(line) {
                    break;
                }
                continue;
            }

            if in_multiline {
                input_buffer.push('\n');
            }
            input_buffer.push_str(line.trim_end_matches('\\'));

            if self.is_complete(line) && self.is_complete(&input_buffer) {
                if !input_buffer.trim().is_empty() {
                    let code = std::mem::take(&mut input_buffer);
                    self.evaluate(&code);
                }
                in_multiline = false;
            } else {
                in_multiline = true;
            }
        }

        println!("{}", "Goodbye!".cyan());
        Ok(())
    }
}
