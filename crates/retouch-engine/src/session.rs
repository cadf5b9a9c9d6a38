//! Session controller: drives user actions against the history and the
//! gateway, guards the single in-flight request and derives what to display.

use std::path::PathBuf;

use chrono::Utc;
use retouch_contracts::credentials::{mask_credential, CredentialStore};
use retouch_contracts::events::{image_summary, EventPayload, EventWriter};
use retouch_contracts::history::{
    version_label, CommitReceipt, History, ImageRemoval, UploadRoute, VersionId,
};
use retouch_contracts::images::{self, DataUri, ImageArtifact, RawUpload};
use retouch_contracts::EditorError;
use serde_json::{json, Map, Value};
use similar::TextDiff;

use crate::download::{generic_download_name, version_download_name, DownloadSink};
use crate::gateway::{GatewayRequest, GatewayResult, ImageGateway};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SubmitState {
    Idle,
    Submitting {
        ticket: u64,
        source: Option<VersionId>,
    },
}

/// Last successful submit, kept as version ids so it can never outlive the
/// versions it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    None,
    Edited {
        source: VersionId,
        result: VersionId,
        note: Option<String>,
    },
    Generated {
        result: VersionId,
        note: Option<String>,
    },
}

/// An accepted submit waiting for its gateway result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmit {
    ticket: u64,
    epoch: u64,
    source: Option<VersionId>,
    request: GatewayRequest,
}

impl PendingSubmit {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn request(&self) -> &GatewayRequest {
        &self.request
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayState<'a> {
    pub images_before: &'a [ImageArtifact],
    pub image_after: Option<&'a ImageArtifact>,
    pub note_after: Option<&'a str>,
    pub pending_prompt: &'a str,
    pub busy: bool,
    pub last_error: Option<String>,
}

pub struct Session {
    history: History,
    credential: Option<String>,
    store: Box<dyn CredentialStore>,
    events: EventWriter,
    submit: SubmitState,
    outcome: Outcome,
    pending_prompt: String,
    last_error: Option<EditorError>,
    epoch: u64,
    next_ticket: u64,
}

impl Session {
    pub fn new(store: Box<dyn CredentialStore>, events: EventWriter) -> anyhow::Result<Self> {
        let credential = store
            .load()?
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        events.emit(
            "session_started",
            map_object(json!({
                "credential_present": credential.is_some(),
            })),
        )?;

        Ok(Self {
            history: History::new(),
            credential,
            store,
            events,
            submit: SubmitState::Idle,
            outcome: Outcome::None,
            pending_prompt: String::new(),
            last_error: None,
            epoch: 0,
            next_ticket: 1,
        })
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub fn masked_credential(&self) -> Option<String> {
        self.credential.as_deref().map(mask_credential)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.submit, SubmitState::Submitting { .. })
    }

    pub fn pending_prompt(&self) -> &str {
        &self.pending_prompt
    }

    pub fn set_pending_prompt(&mut self, prompt: &str) {
        self.pending_prompt = prompt.to_string();
    }

    pub fn last_error(&self) -> Option<&EditorError> {
        self.last_error.as_ref()
    }

    /// Bumped by every history mutation made through the session.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn set_credential(&mut self, credential: &str) -> Result<(), EditorError> {
        let trimmed = credential.trim();
        if trimmed.is_empty() {
            return self.record(Err(EditorError::MissingCredential));
        }
        let saved = self
            .store
            .save(trimmed)
            .map_err(|err| EditorError::Storage(format!("{err:#}")));
        self.record(saved)?;

        let replaced = self.credential.replace(trimmed.to_string()).is_some();
        self.last_error = None;
        self.emit("credential_saved", json!({ "replaced": replaced }));
        Ok(())
    }

    /// Forgets the credential and everything edited under it.
    pub fn clear_credential(&mut self) -> Result<(), EditorError> {
        let cleared = self
            .store
            .clear()
            .map_err(|err| EditorError::Storage(format!("{err:#}")));
        self.record(cleared)?;

        let discarded = self.history.len();
        self.credential = None;
        self.history.clear();
        self.pending_prompt.clear();
        self.touch();
        self.emit(
            "credential_cleared",
            json!({ "discarded_versions": discarded }),
        );
        Ok(())
    }

    /// Encodes every upload first, so a bad file leaves history untouched.
    pub fn upload(&mut self, uploads: Vec<RawUpload>) -> Result<UploadRoute, EditorError> {
        let encoded = uploads
            .iter()
            .map(|upload| images::encode(upload).and_then(|uri| uri.to_artifact()))
            .collect::<Result<Vec<_>, _>>();
        let artifacts = self.record(encoded)?;
        let summaries: Vec<Value> = artifacts.iter().map(image_summary).collect();

        let appended = self.history.append_initial(artifacts);
        let route = self.record(appended)?;
        let (route_name, index) = match route {
            UploadRoute::Unchanged => return Ok(route),
            UploadRoute::NewVersion(index) => {
                self.pending_prompt.clear();
                ("new_version", index)
            }
            UploadRoute::ExtendedCurrent(index) => ("extended_current", index),
        };
        self.touch();
        self.emit(
            "images_uploaded",
            json!({
                "route": route_name,
                "index": index,
                "label": version_label(index),
                "images": summaries,
                "history_len": self.history.len(),
            }),
        );
        Ok(route)
    }

    /// Validates preconditions and enters `Submitting`.
    ///
    /// The returned ticket must be handed back to [`Session::complete_submit`]
    /// together with the gateway outcome.
    pub fn begin_submit(&mut self, prompt: &str) -> Result<PendingSubmit, EditorError> {
        if self.is_busy() {
            self.emit("submit_rejected", json!({ "error": EditorError::Busy.kind() }));
            return Err(EditorError::Busy);
        }

        let prompt = prompt.trim();
        self.pending_prompt = prompt.to_string();
        let Some(credential) = self.credential.clone() else {
            return self.reject_submit(EditorError::MissingCredential);
        };
        if prompt.is_empty() {
            return self.reject_submit(EditorError::MissingPrompt);
        }

        let (source, request) = match self.history.current() {
            Some(version) if !version.images().is_empty() => (
                Some(version.id().clone()),
                GatewayRequest::Edit {
                    images: version.images().to_vec(),
                    prompt: prompt.to_string(),
                    credential,
                },
            ),
            _ => (
                None,
                GatewayRequest::Generate {
                    prompt: prompt.to_string(),
                    credential,
                },
            ),
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.submit = SubmitState::Submitting {
            ticket,
            source: source.clone(),
        };
        self.outcome = Outcome::None;
        self.last_error = None;

        let image_count = match &request {
            GatewayRequest::Edit { images, .. } => images.len(),
            GatewayRequest::Generate { .. } => 0,
        };
        self.emit(
            "submit_started",
            json!({
                "ticket": ticket,
                "mode": request.mode(),
                "prompt": prompt,
                "image_count": image_count,
                "cursor": self.history.cursor_index(),
            }),
        );

        Ok(PendingSubmit {
            ticket,
            epoch: self.epoch,
            source,
            request,
        })
    }

    /// Applies a gateway outcome. Leaves `Submitting` on every path except a
    /// ticket that is not the one in flight, which is ignored.
    pub fn complete_submit(
        &mut self,
        pending: PendingSubmit,
        outcome: Result<GatewayResult, EditorError>,
    ) -> Result<CommitReceipt, EditorError> {
        match &self.submit {
            SubmitState::Submitting { ticket, .. } if *ticket == pending.ticket => {}
            _ => return Err(EditorError::StaleResult),
        }
        self.submit = SubmitState::Idle;

        if pending.epoch != self.epoch {
            let discarded_outcome = match &outcome {
                Ok(_) => "ok",
                Err(err) => err.kind(),
            };
            self.last_error = Some(EditorError::StaleResult);
            self.emit(
                "stale_result_discarded",
                json!({
                    "ticket": pending.ticket,
                    "started_epoch": pending.epoch,
                    "epoch": self.epoch,
                    "discarded_outcome": discarded_outcome,
                }),
            );
            return Err(EditorError::StaleResult);
        }

        let result = match outcome {
            Ok(result) => result,
            Err(err) => return self.fail_submit(&pending, err),
        };
        let Some(image) = result.image else {
            return self.fail_submit(&pending, EditorError::NoImageReturned);
        };
        let hint = format!("edited-{}", Utc::now().timestamp_millis());
        let blob = match images::decode(image.as_str(), &hint) {
            Ok(blob) => blob,
            Err(err) => return self.fail_submit(&pending, err),
        };

        let prompt = pending.request.prompt().to_string();
        let summary = image_summary(&blob.artifact);
        let receipt = match &pending.source {
            Some(_) => match self.history.commit_edit(blob.artifact, &prompt) {
                Ok(receipt) => receipt,
                Err(err) => return self.fail_submit(&pending, err),
            },
            None => self.history.commit_fresh_generation(blob.artifact, &prompt),
        };

        let result_id = self
            .history
            .get(receipt.index)
            .map(|version| version.id().clone())
            .ok_or(EditorError::NoCurrentVersion)?;
        self.outcome = match pending.source.clone() {
            Some(source) => Outcome::Edited {
                source,
                result: result_id.clone(),
                note: result.note.clone(),
            },
            None => Outcome::Generated {
                result: result_id.clone(),
                note: result.note.clone(),
            },
        };
        self.pending_prompt.clear();
        self.last_error = None;
        self.epoch += 1;

        let mut payload = map_object(json!({
            "ticket": pending.ticket,
            "mode": pending.request.mode(),
            "index": receipt.index,
            "label": version_label(receipt.index),
            "version_id": result_id,
            "source_version_id": pending.source,
            "discarded": receipt.discarded,
            "history_len": self.history.len(),
            "prompt": prompt,
            "note": result.note,
            "image": summary,
        }));
        if let Some(lines) = prompt_diff(receipt.replaced_prompt.as_deref(), &prompt) {
            payload.insert("prompt_diff".to_string(), json!(lines));
        }
        let _ = self.events.emit("version_created", payload);
        Ok(receipt)
    }

    /// Blocking submit: begin, call the gateway, complete.
    pub fn submit(
        &mut self,
        gateway: &dyn ImageGateway,
        prompt: &str,
    ) -> Result<CommitReceipt, EditorError> {
        let pending = self.begin_submit(prompt)?;
        let outcome = pending.request().dispatch(gateway);
        self.complete_submit(pending, outcome)
    }

    /// Re-submits the pending prompt, e.g. the one pre-filled by a revert.
    pub fn submit_pending(
        &mut self,
        gateway: &dyn ImageGateway,
    ) -> Result<CommitReceipt, EditorError> {
        let prompt = self.pending_prompt.clone();
        self.submit(gateway, &prompt)
    }

    /// Selects `index` for editing and pre-fills the prompt that was last
    /// applied to it.
    pub fn revert_to(&mut self, index: usize) -> Result<(), EditorError> {
        let reverted = self
            .history
            .revert(index)
            .map(|version| version.prompt_used().unwrap_or_default().to_string());
        self.pending_prompt = self.record(reverted)?;
        self.touch();
        self.emit(
            "history_reverted",
            json!({
                "index": index,
                "label": version_label(index),
                "prefilled_prompt": !self.pending_prompt.is_empty(),
            }),
        );
        Ok(())
    }

    pub fn reset_to_original(&mut self) -> usize {
        if self.history.is_empty() {
            return 0;
        }
        let discarded = self.history.reset_to_original();
        self.pending_prompt.clear();
        self.touch();
        self.emit("history_reset", json!({ "discarded": discarded }));
        discarded
    }

    pub fn remove_version(&mut self, index: usize) -> Result<(), EditorError> {
        let removed = self.history.remove_version(index);
        let removed = self.record(removed)?;
        self.touch();
        self.emit(
            "version_removed",
            json!({
                "index": index,
                "label": version_label(index),
                "image_count": removed.images().len(),
                "history_len": self.history.len(),
                "cursor": self.history.cursor_index(),
            }),
        );
        Ok(())
    }

    pub fn remove_image_from_version(
        &mut self,
        version_index: usize,
        image_index: usize,
    ) -> Result<ImageRemoval, EditorError> {
        let removal = self
            .history
            .remove_image_from_version(version_index, image_index);
        let removal = self.record(removal)?;
        self.touch();
        self.emit(
            "image_removed",
            json!({
                "index": version_index,
                "image_index": image_index,
                "whole_version": removal == ImageRemoval::WholeVersion,
                "history_len": self.history.len(),
                "cursor": self.history.cursor_index(),
            }),
        );
        Ok(removal)
    }

    pub fn clear_all(&mut self) {
        let discarded = self.history.len();
        self.history.clear();
        self.pending_prompt.clear();
        self.touch();
        self.emit("history_cleared", json!({ "discarded": discarded }));
    }

    /// Writes every image of version `index` through `sink`.
    pub fn download_version(
        &self,
        sink: &dyn DownloadSink,
        index: usize,
    ) -> Result<Vec<PathBuf>, EditorError> {
        let version = self
            .history
            .get(index)
            .ok_or(EditorError::IndexOutOfRange {
                index,
                len: self.history.len(),
            })?;
        let mut written = Vec::with_capacity(version.images().len());
        for (image_index, image) in version.images().iter().enumerate() {
            let name = version_download_name(index, image_index, image.mime_type());
            written.push(self.download_one(sink, image, &name, Some(index))?);
        }
        Ok(written)
    }

    /// Writes the "after" image under a generic name, if there is one.
    pub fn download_after(&self, sink: &dyn DownloadSink) -> Result<Option<PathBuf>, EditorError> {
        let Some(image) = self.display().image_after else {
            return Ok(None);
        };
        let name = generic_download_name(image.mime_type());
        self.download_one(sink, image, &name, None).map(Some)
    }

    pub fn display(&self) -> DisplayState<'_> {
        let cursor_images: &[ImageArtifact] = self
            .history
            .current()
            .map(|version| version.images())
            .unwrap_or(&[]);
        let images_of = |id: &VersionId| self.history.find(id).map(|version| version.images());

        let images_before: &[ImageArtifact] = match (&self.submit, &self.outcome) {
            (SubmitState::Submitting { source, .. }, _) => {
                source.as_ref().and_then(images_of).unwrap_or(&[])
            }
            (SubmitState::Idle, Outcome::Edited { source, .. }) => {
                images_of(source).unwrap_or(cursor_images)
            }
            (SubmitState::Idle, Outcome::Generated { .. }) => &[],
            (SubmitState::Idle, Outcome::None) => cursor_images,
        };
        let (image_after, note_after) = match &self.outcome {
            Outcome::None => (None, None),
            Outcome::Edited { result, note, .. } | Outcome::Generated { result, note } => {
                match self.history.find(result) {
                    Some(version) => (version.first_image(), note.as_deref()),
                    None => (None, None),
                }
            }
        };

        DisplayState {
            images_before,
            image_after,
            note_after,
            pending_prompt: &self.pending_prompt,
            busy: self.is_busy(),
            last_error: self.last_error.as_ref().map(EditorError::user_message),
        }
    }

    fn download_one(
        &self,
        sink: &dyn DownloadSink,
        image: &ImageArtifact,
        name: &str,
        index: Option<usize>,
    ) -> Result<PathBuf, EditorError> {
        let uri = DataUri::from(image);
        let path = sink
            .download(&uri, name)
            .map_err(|err| EditorError::Storage(format!("{err:#}")))?;
        self.emit(
            "image_downloaded",
            json!({
                "index": index,
                "path": path.to_string_lossy(),
                "image": image_summary(image),
            }),
        );
        Ok(path)
    }

    fn reject_submit<T>(&mut self, err: EditorError) -> Result<T, EditorError> {
        self.emit("submit_rejected", json!({ "error": err.kind() }));
        self.record(Err(err))
    }

    fn fail_submit<T>(
        &mut self,
        pending: &PendingSubmit,
        err: EditorError,
    ) -> Result<T, EditorError> {
        self.emit(
            "submit_failed",
            json!({
                "ticket": pending.ticket,
                "mode": pending.request.mode(),
                "error": err.kind(),
                "message": err.user_message(),
            }),
        );
        self.record(Err(err))
    }

    fn record<T>(&mut self, result: Result<T, EditorError>) -> Result<T, EditorError> {
        if let Err(err) = &result {
            self.last_error = Some(err.clone());
        }
        result
    }

    /// A history mutation succeeded: drop derived state and fence in-flight
    /// results.
    fn touch(&mut self) {
        self.outcome = Outcome::None;
        self.last_error = None;
        self.epoch += 1;
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let _ = self.events.emit(event_type, map_object(payload));
    }
}

fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_else(Map::new)
}

fn prompt_diff(prev: Option<&str>, curr: &str) -> Option<Vec<String>> {
    let prev = prev?;
    let diff = TextDiff::from_lines(prev, curr);
    let rendered = diff.unified_diff().header("prev", "curr").to_string();
    Some(rendered.lines().map(str::to_string).collect())
}
