use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::{Record, Snapshot};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for {collection} failed: {source}")]
    Http {
        collection: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("record service returned {status} for {collection}")]
    Status {
        collection: &'static str,
        status: reqwest::StatusCode,
    },
    #[error("could not decode {collection}: {source}")]
    Decode {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not decode {collection} record {record}: {source}")]
    Record {
        collection: &'static str,
        record: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("no record source configured; set --api-url or --snapshot-dir")]
    MissingSource,
}

/// Application identifiers of the five collections in the record service.
#[derive(Debug, Clone)]
pub struct AppIds {
    pub instructors: String,
    pub rooms: String,
    pub participants: String,
    pub courses: String,
    pub registrations: String,
}

/// Accepts both body shapes the record service produces: an object keyed by
/// record id, or a plain list of records. Each record is decoded on its own so
/// a failure names the offending record.
pub fn decode_records<F>(collection: &'static str, body: &[u8]) -> Result<Vec<Record<F>>, FetchError>
where
    F: DeserializeOwned + Default,
{
    let parsed: serde_json::Value = serde_json::from_slice(body)
        .map_err(|source| FetchError::Decode { collection, source })?;

    let decode = |record: String, value: serde_json::Value| {
        serde_json::from_value::<Record<F>>(value)
            .map_err(|source| FetchError::Record { collection, record, source })
    };

    match parsed {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(id, value)| {
                let mut record = decode(id.clone(), value)?;
                record.record_id = id;
                Ok(record)
            })
            .collect(),
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, value)| decode(format!("#{index}"), value))
            .collect(),
        other => Err(FetchError::Decode {
            collection,
            source: serde::de::Error::invalid_type(
                serde::de::Unexpected::Other(json_kind(&other)),
                &"an object keyed by record id or an array of records",
            ),
        }),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

pub struct RecordClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    apps: AppIds,
}

impl RecordClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        apps: AppIds,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            apps,
        })
    }

    pub fn records_url(&self, app_id: &str) -> String {
        format!("{}/apps/{}/records", self.base_url, app_id)
    }

    async fn fetch_collection<F>(
        &self,
        collection: &'static str,
        app_id: &str,
    ) -> Result<Vec<Record<F>>, FetchError>
    where
        F: DeserializeOwned + Default,
    {
        let url = self.records_url(app_id);
        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|source| FetchError::Http { collection, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { collection, status });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Http { collection, source })?;
        let records = decode_records(collection, &body)?;
        tracing::debug!(collection, count = records.len(), "fetched records");
        Ok(records)
    }

    /// Fetches all five collections concurrently; the first failure wins.
    pub async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError> {
        let (instructors, rooms, participants, courses, registrations) = tokio::try_join!(
            self.fetch_collection("instructors", &self.apps.instructors),
            self.fetch_collection("rooms", &self.apps.rooms),
            self.fetch_collection("participants", &self.apps.participants),
            self.fetch_collection("courses", &self.apps.courses),
            self.fetch_collection("registrations", &self.apps.registrations),
        )?;

        Ok(Snapshot {
            instructors,
            rooms,
            participants,
            courses,
            registrations,
        })
    }
}

async fn read_collection<F>(dir: &Path, collection: &'static str) -> Result<Vec<Record<F>>, FetchError>
where
    F: DeserializeOwned + Default,
{
    let path = dir.join(format!("{collection}.json"));
    let body = tokio::fs::read(&path)
        .await
        .map_err(|source| FetchError::Io { path, source })?;
    decode_records(collection, &body)
}

/// Loads a snapshot from `<dir>/{instructors,rooms,participants,courses,registrations}.json`.
pub async fn load_snapshot(dir: &Path) -> Result<Snapshot, FetchError> {
    let (instructors, rooms, participants, courses, registrations) = tokio::try_join!(
        read_collection(dir, "instructors"),
        read_collection(dir, "rooms"),
        read_collection(dir, "participants"),
        read_collection(dir, "courses"),
        read_collection(dir, "registrations"),
    )?;

    Ok(Snapshot {
        instructors,
        rooms,
        participants,
        courses,
        registrations,
    })
}

pub enum Source {
    Api(RecordClient),
    Snapshot(PathBuf),
}

impl Source {
    pub async fn fetch(&self) -> Result<Snapshot, FetchError> {
        let snapshot = match self {
            Source::Api(client) => client.fetch_snapshot().await?,
            Source::Snapshot(dir) => load_snapshot(dir).await?,
        };

        tracing::info!(
            instructors = snapshot.instructors.len(),
            rooms = snapshot.rooms.len(),
            participants = snapshot.participants.len(),
            courses = snapshot.courses.len(),
            registrations = snapshot.registrations.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }
}
