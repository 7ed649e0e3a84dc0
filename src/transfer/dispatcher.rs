//! Command dispatcher.
//!
//! Turns one [`PendingCommand`] into the bytes the outbound engine sends
//! back. All storage access of the transfer core happens here, on the
//! polling side.
//!
//! Response framing differs per endpoint and must stay as existing
//! companion apps expect it:
//!
//! ```text
//! records  TOTAL/NEW    [cmd] "1234"
//!          ALL/NEW_RANGE [cmd] "40-99/100" "[{...},...]"
//!          unknown      [cmd, 0x01] "Unknown command"
//! config   LIST/GET     [code] payload
//!          SAVE/NEW     "2" "0"   (ASCII command, ASCII code)
//! ```

use log::{debug, error, info, warn};

use super::channels::{PendingCommand, json_document};
use super::config_files::{ConfigFiles, NAME_FIELD, extract_name};
use super::range::{RangePlan, parse_range, plan_all_range, plan_new_range};
use crate::app::commands::{
    ConfigCommand, Endpoint, RecordCommand, ResponseCode, UNKNOWN_COMMAND_TEXT,
};
use crate::app::ports::{Clock, ConfigPort, FileStore, RecordStore};
use crate::config::Settings;
use crate::index::{ProgressDelta, ProgressIndex, ProgressIndexStore};
use crate::records::Record;

/// What to send back, and what to credit once it is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub endpoint: Endpoint,
    pub bytes: Vec<u8>,
    /// Progress applied only after the whole response was acknowledged.
    pub on_complete: Option<ProgressDelta>,
    /// A new configuration was installed and handed to the [`ConfigPort`].
    pub config_applied: bool,
}

impl Response {
    fn new(endpoint: Endpoint, bytes: Vec<u8>) -> Self {
        Self {
            endpoint,
            bytes,
            on_complete: None,
            config_applied: false,
        }
    }
}

pub struct CommandDispatcher<F, R, P, C>
where
    F: FileStore,
    R: RecordStore,
    P: ConfigPort,
    C: Clock,
{
    index: ProgressIndexStore<F, C>,
    records: R,
    files: ConfigFiles<F>,
    config: P,
    clock: C,
    settings: Settings,
}

impl<F, R, P, C> CommandDispatcher<F, R, P, C>
where
    F: FileStore + Clone,
    R: RecordStore,
    P: ConfigPort,
    C: Clock + Clone,
{
    pub fn new(files: F, records: R, config: P, clock: C, settings: Settings) -> Self {
        Self {
            index: ProgressIndexStore::new(files.clone(), clock.clone(), &settings),
            records,
            files: ConfigFiles::new(files),
            config,
            clock,
            settings,
        }
    }
}

impl<F, R, P, C> CommandDispatcher<F, R, P, C>
where
    F: FileStore,
    R: RecordStore,
    P: ConfigPort,
    C: Clock,
{
    pub fn index(&self) -> &ProgressIndexStore<F, C> {
        &self.index
    }

    pub fn records(&self) -> &R {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut R {
        &mut self.records
    }

    pub fn config_files(&self) -> &ConfigFiles<F> {
        &self.files
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn dispatch(&mut self, cmd: &PendingCommand) -> Response {
        debug!(
            "Dispatch: {:?} command 0x{:02x} ({} arg bytes)",
            cmd.endpoint,
            cmd.command,
            cmd.payload.len()
        );
        if let Some(doc) = Self::raw_document(cmd) {
            return self.new_config(&doc);
        }
        match cmd.endpoint {
            Endpoint::Records => self.dispatch_records(cmd),
            Endpoint::Config => self.dispatch_config(cmd),
        }
    }

    /// A message that arrived as a bare JSON document.
    fn raw_document(cmd: &PendingCommand) -> Option<Vec<u8>> {
        let mut message = Vec::with_capacity(cmd.payload.len() + 1);
        message.push(cmd.command);
        message.extend_from_slice(&cmd.payload);
        json_document(&message).map(<[u8]>::to_vec)
    }

    // --- Records endpoint ---

    fn dispatch_records(&mut self, cmd: &PendingCommand) -> Response {
        let Some(command) = RecordCommand::from_byte(cmd.command) else {
            warn!("Dispatch: unknown records command 0x{:02x}", cmd.command);
            let mut bytes = vec![cmd.command, ResponseCode::UnknownCommand as u8];
            bytes.extend_from_slice(UNKNOWN_COMMAND_TEXT.as_bytes());
            return Response::new(Endpoint::Records, bytes);
        };

        let index = self.load_index();
        let text = match command {
            RecordCommand::TotalCount => index.measured.to_string(),
            RecordCommand::NewCount => index.pending().to_string(),
            RecordCommand::AllRange => {
                return self.range_response(cmd.command, plan_all_range(parse_range(&cmd.payload), index));
            }
            RecordCommand::NewRange => {
                return self.range_response(cmd.command, plan_new_range(parse_range(&cmd.payload), index));
            }
        };
        let mut bytes = vec![cmd.command];
        bytes.extend_from_slice(text.as_bytes());
        Response::new(Endpoint::Records, bytes)
    }

    fn load_index(&self) -> ProgressIndex {
        self.index.load().unwrap_or_else(|e| {
            error!("Dispatch: index unreadable ({}), answering with zeros", e);
            ProgressIndex::default()
        })
    }

    fn range_response(&mut self, command: u8, plan: RangePlan) -> Response {
        let records = match plan.fetch {
            Some((start, end)) => self.fetch(start, end, plan.measured),
            None => Vec::new(),
        };
        let json = serde_json::to_string(&records).unwrap_or_else(|e| {
            error!("Dispatch: record serialisation failed: {}", e);
            "[]".into()
        });

        let mut bytes = vec![command];
        bytes.extend_from_slice(plan.header().as_bytes());
        bytes.extend_from_slice(json.as_bytes());
        info!(
            "Dispatch: range {} with {} records ({} bytes)",
            plan.header(),
            records.len(),
            bytes.len()
        );

        let mut response = Response::new(Endpoint::Records, bytes);
        if let Some(delta) = plan.delta {
            if self.settings.advance_on_delivery {
                response.on_complete = Some(delta);
            } else if let Err(e) = self.index.apply(delta) {
                error!("Dispatch: could not advance transmitted: {}", e);
            }
        }
        response
    }

    /// Load `start..=end`; an empty result while records should exist is
    /// re-read a few times since the card may be busy with a write.
    fn fetch(&self, start: u32, end: u32, measured: u32) -> Vec<Record> {
        let mut attempt = 0;
        loop {
            let records = self.records.load_records(start, end).unwrap_or_else(|e| {
                warn!("Dispatch: loading records {}-{} failed: {}", start, end, e);
                Vec::new()
            });
            if !records.is_empty() || measured == 0 || attempt >= self.settings.index_read_retries {
                return records;
            }
            attempt += 1;
            debug!("Dispatch: no records for {}-{}, re-reading ({})", start, end, attempt);
            self.clock.delay_ms(self.settings.index_retry_delay_ms);
        }
    }

    // --- Config endpoint ---

    fn dispatch_config(&mut self, cmd: &PendingCommand) -> Response {
        let Some(command) = ConfigCommand::from_byte(cmd.command) else {
            warn!("Dispatch: unknown config command 0x{:02x}", cmd.command);
            return Self::stateful(cmd.command, ResponseCode::UnknownCommand);
        };
        match command {
            ConfigCommand::ListFiles => {
                let list = self.files.list();
                Self::reply(command, ResponseCode::Ok, list.as_bytes())
            }
            ConfigCommand::GetFile => {
                let name = extract_name(&cmd.payload);
                match self.files.get(&name) {
                    Some(content) if !content.is_empty() => {
                        Self::reply(command, ResponseCode::Ok, &content)
                    }
                    _ => {
                        warn!("Dispatch: GET_FILE '{}' not found", name);
                        Self::reply(command, ResponseCode::FileNotFound, &[])
                    }
                }
            }
            ConfigCommand::SaveFile => {
                let code = if cmd.payload.len() <= NAME_FIELD {
                    warn!("Dispatch: SAVE_FILE of {} bytes is too short", cmd.payload.len());
                    ResponseCode::UnknownCommand
                } else {
                    let name = extract_name(&cmd.payload[..NAME_FIELD]);
                    if name.is_empty() {
                        ResponseCode::UnknownCommand
                    } else {
                        self.files.save(&name, &cmd.payload[NAME_FIELD..])
                    }
                };
                Self::reply(command, code, &[])
            }
            ConfigCommand::NewConfig => self.new_config(&cmd.payload),
        }
    }

    fn new_config(&mut self, document: &[u8]) -> Response {
        let command = ConfigCommand::NewConfig;
        let config = match self.files.install_config(document) {
            Ok(config) => config,
            Err(code) => return Self::reply(command, code, &[]),
        };
        if let Err(e) = self.config.apply(&config) {
            warn!("Dispatch: live config refused update: {}", e);
            return Self::reply(command, ResponseCode::InvalidConfig, &[]);
        }
        info!("Dispatch: configuration applied");
        let mut response = Self::reply(command, ResponseCode::Ok, &[]);
        response.config_applied = true;
        response
    }

    /// Frame a config response in the shape its command uses.
    fn reply(command: ConfigCommand, code: ResponseCode, payload: &[u8]) -> Response {
        if command.is_simple() {
            Self::simple(code, payload)
        } else {
            Self::stateful(command as u8, code)
        }
    }

    fn simple(code: ResponseCode, payload: &[u8]) -> Response {
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.push(code as u8);
        bytes.extend_from_slice(payload);
        Response::new(Endpoint::Config, bytes)
    }

    fn stateful(command: u8, code: ResponseCode) -> Response {
        let text = format!("{}{}", command, code as u8);
        Response::new(Endpoint::Config, text.into_bytes())
    }
}

// ── Tests ────────────────────────────────────────────────────
