//! One-line-per-event file writer shared by the `json`, `txt` and `csv` outputs.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::info;

use spyglass_common::event::Event;

use crate::error::ModuleError;
use crate::modules::runtime::{EventHandler, ModuleContext};

/// How one output kind renders events.
pub trait LineFormat: Send + Sync + 'static {
    /// File name used when the `output_file` option is not set.
    fn file_name(&self) -> &'static str;

    fn header(&self) -> Option<String> {
        None
    }

    /// One line, without the trailing newline.
    fn line(&self, event: &Event) -> String;
}

pub struct FileOutput<F: LineFormat> {
    format: F,
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    written: usize,
}

impl<F: LineFormat> FileOutput<F> {
    pub fn new(format: F) -> Self {
        Self {
            format,
            path: None,
            writer: None,
            written: 0,
        }
    }

    async fn flush(&mut self) -> Result<(), ModuleError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<F: LineFormat> EventHandler for FileOutput<F> {
    async fn setup(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let path = match ctx.option_str("output_file") {
            Some(custom) => PathBuf::from(custom),
            None => ctx.output_dir.join(self.format.file_name()),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut writer = BufWriter::new(File::create(&path).await?);
        if let Some(header) = self.format.header() {
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        self.writer = Some(writer);
        self.path = Some(path);
        Ok(())
    }

    async fn handle_event(&mut self, event: Arc<Event>, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(ModuleError::NotRunning {
                module: ctx.name.clone(),
            });
        };
        let mut line = self.format.line(&event);
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        self.written += 1;
        Ok(())
    }

    async fn finish(&mut self, _ctx: &ModuleContext) -> Result<(), ModuleError> {
        self.flush().await
    }

    async fn cleanup(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        self.flush().await?;
        if let Some(path) = &self.path {
            info!(
                "Saved {} output ({} events) to {}",
                ctx.name,
                self.written,
                path.display()
            );
        }
        self.writer = None;
        Ok(())
    }
}
