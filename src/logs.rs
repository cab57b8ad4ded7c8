use std::{
    fs,
    path::Path,
    sync::{mpsc, LazyLock, Mutex, PoisonError},
};

use anyhow::Result;
use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    {ContentLimit, FileRotate},
};
use log::Log;
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};

/// Where formatted log lines go besides the log file, registered by the
/// presentation layer.
static LOG_LISTENER: LazyLock<Mutex<Option<mpsc::Sender<String>>>> =
    LazyLock::new(|| Mutex::new(None));

pub struct MainLogger {
    write_logger: Box<WriteLogger<FileRotate<AppendTimestamp>>>,
}

impl MainLogger {
    fn new(write_logger: Box<WriteLogger<FileRotate<AppendTimestamp>>>) -> Self {
        Self { write_logger }
    }
}

impl Log for MainLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.write_logger.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.write_logger.log(record);

        let message = format_record(record);
        let mut listener = LOG_LISTENER
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match listener.as_ref() {
            Some(tx) => {
                // the receiving side went away, stop forwarding
                if tx.send(message).is_err() {
                    *listener = None;
                }
            }
            None => eprintln!("{}", message),
        }
    }

    fn flush(&self) {
        self.write_logger.flush();
    }
}

fn format_record(record: &log::Record) -> String {
    format!(
        "{}:{} -- {}",
        record.level(),
        record.target(),
        record.args()
    )
}

/// Installs the global logger: a rotating `logs/main.log` under `log_dir`
/// (3 files, 1000 lines each) plus the optional listener.
pub fn init(log_dir: &str) -> Result<()> {
    let dir = Path::new(log_dir).join("logs");
    fs::create_dir_all(&dir)?;
    let path = dir.join("main.log");
    let log = FileRotate::new(
        path,
        AppendTimestamp::default(FileLimit::MaxFiles(3)),
        ContentLimit::Lines(1000),
        Compression::None,
        #[cfg(unix)]
        None,
    );
    let config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let write_logger = WriteLogger::new(LevelFilter::Info, config, log);
    let main_logger = MainLogger::new(write_logger);
    log::set_boxed_logger(Box::new(main_logger))?;
    log::set_max_level(LevelFilter::Info);
    Ok(())
}

/// Forwards every log line to `sender` from now on, replacing any
/// previous listener.
pub fn set_listener(sender: mpsc::Sender<String>) {
    *LOG_LISTENER
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(sender);
}
