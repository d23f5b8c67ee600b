//! Guest `console` output routing

use boa_engine::{Context, JsResult};
use boa_gc::{Finalize, Trace};
use boa_runtime::{ConsoleState, Logger};
use tracing::{error, info, warn};

/// Where guest console output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleSink {
    /// `log`/`info` to stdout, `warn`/`error` to stderr
    #[default]
    Stdio,
    /// Structured events under the `sidewinder::guest` target
    Tracing,
}

/// Logger handed to boa_runtime's console extension
#[derive(Debug, Clone, Default, Trace, Finalize)]
pub struct HostLogger {
    #[unsafe_ignore_trace]
    sink: ConsoleSink,
}

impl HostLogger {
    pub fn new(sink: ConsoleSink) -> Self {
        Self { sink }
    }
}

impl Logger for HostLogger {
    fn log(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        match self.sink {
            ConsoleSink::Stdio => println!("{msg}"),
            ConsoleSink::Tracing => info!(target: "sidewinder::guest", "{msg}"),
        }
        Ok(())
    }

    fn info(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        match self.sink {
            ConsoleSink::Stdio => println!("{msg}"),
            ConsoleSink::Tracing => info!(target: "sidewinder::guest", "{msg}"),
        }
        Ok(())
    }

    fn warn(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        match self.sink {
            ConsoleSink::Stdio => eprintln!("{msg}"),
            ConsoleSink::Tracing => warn!(target: "sidewinder::guest", "{msg}"),
        }
        Ok(())
    }

    fn error(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        match self.sink {
            ConsoleSink::Stdio => eprintln!("{msg}"),
            ConsoleSink::Tracing => error!(target: "sidewinder::guest", "{msg}"),
        }
        Ok(())
    }
}
