//! SAMS data API client.
//!
//! Builds request bodies for a partition, attaches the bearer token and
//! checks the response envelope before handing records to the downloader.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sams_core::{HttpRequest, HttpResponse, Method, Transport};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::partition::{EntityType, PartitionKey};
use crate::token::TokenManager;

const AUTH_PATH: &str = "getDPICtoken";
const STUDENT_PATH: &str = "GetDPICStudentData";
const INSTITUTE_PATH: &str = "GetDPICInstituteData";

/// Fields every data envelope must carry
const ENVELOPE_FIELDS: [&str; 4] = ["StatusCode", "TotalRecordCount", "RecordCount", "Data"];

#[derive(Debug, Clone)]
pub struct Endpoints {
    base_url: String,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn auth(&self) -> String {
        format!("{}/{AUTH_PATH}", self.base_url)
    }

    pub fn data(&self, entity: EntityType) -> String {
        let path = match entity {
            EntityType::Student => STUDENT_PATH,
            EntityType::Institute => INSTITUTE_PATH,
        };
        format!("{}/{path}", self.base_url)
    }
}

/// A validated response envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub status_code: i64,
    pub total_record_count: u64,
    pub record_count: u64,
    pub data: Vec<Value>,
}

/// Where the downloader gets pages and counts from.
///
/// `page` is `None` for non-paginated partitions.
pub trait PageSource: Send + Sync {
    fn fetch_page(&self, partition: &PartitionKey, page: Option<u32>)
        -> Result<Vec<Value>, ApiError>;

    /// Total records upstream reports for the partition
    fn fetch_count(&self, partition: &PartitionKey) -> Result<u64, ApiError>;
}

pub struct ApiClient {
    endpoints: Endpoints,
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenManager>,
    requests: AtomicUsize,
}

impl ApiClient {
    pub fn new(endpoints: Endpoints, transport: Arc<dyn Transport>, tokens: Arc<TokenManager>) -> Self {
        Self {
            endpoints,
            transport,
            tokens,
            requests: AtomicUsize::new(0),
        }
    }

    /// Data-endpoint requests sent, including recovery resends
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// One data call, envelope validated
    pub fn fetch(&self, partition: &PartitionKey, page: Option<u32>) -> Result<Envelope, ApiError> {
        let response = self.send(partition, page)?;
        parse_envelope(&response)
    }

    fn build_request(&self, partition: &PartitionKey, page: Option<u32>) -> Result<HttpRequest, ApiError> {
        Ok(HttpRequest {
            method: Method::Get,
            url: self.endpoints.data(partition.entity),
            authorization: Some(self.tokens.auth_header()?),
            body: request_body(partition, page),
        })
    }

    /// Send once; on a timeout or truncated body force a new token and resend exactly once
    fn send(&self, partition: &PartitionKey, page: Option<u32>) -> Result<HttpResponse, ApiError> {
        let request = self.build_request(partition, page)?;
        self.requests.fetch_add(1, Ordering::Relaxed);
        match self.transport.send(&request) {
            Ok(response) => Ok(response),
            Err(e) if e.is_recoverable() => {
                log::warn!("{partition}: {e}; refreshing token and resending");
                self.tokens.force_refresh()?;
                let request = self.build_request(partition, page)?;
                self.requests.fetch_add(1, Ordering::Relaxed);
                Ok(self.transport.send(&request)?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl PageSource for ApiClient {
    fn fetch_page(&self, partition: &PartitionKey, page: Option<u32>) -> Result<Vec<Value>, ApiError> {
        Ok(self.fetch(partition, page)?.data)
    }

    fn fetch_count(&self, partition: &PartitionKey) -> Result<u64, ApiError> {
        let page = partition.program.paginates(partition.entity).then_some(1);
        Ok(self.fetch(partition, page)?.total_record_count)
    }
}

/// JSON body for a data call
pub fn request_body(partition: &PartitionKey, page: Option<u32>) -> Value {
    let mut body = Map::new();
    body.insert("Module".into(), partition.program.api_name().into());
    body.insert("AcademicYear".into(), partition.period.into());
    match partition.entity {
        EntityType::Student => {
            if let Some(page) = page {
                body.insert("PageNumber".into(), page.into());
            }
        }
        EntityType::Institute => {
            if let Some(variant) = partition.variant {
                body.insert("AdmissionType".into(), variant.code().into());
            }
        }
    }
    Value::Object(body)
}

/// Map status codes and check the envelope's shape and internal consistency
pub fn parse_envelope(response: &HttpResponse) -> Result<Envelope, ApiError> {
    match response.status {
        200 => {}
        400 => return Err(ApiError::BadRequest),
        500 => return Err(ApiError::ServerError),
        s => return Err(ApiError::Http(s)),
    }

    let value: Value = serde_json::from_str(&response.body)
        .map_err(|e| ApiError::Malformed(format!("body is not JSON ({e})")))?;
    let Value::Object(obj) = value else {
        return Err(ApiError::Malformed("body is not a JSON object".into()));
    };

    // Business-level rejection comes with its own message
    let flag = obj.get("success").or_else(|| obj.get("Success"));
    if flag.and_then(Value::as_bool) == Some(false) {
        let message = obj
            .get("message")
            .or_else(|| obj.get("Message"))
            .and_then(Value::as_str)
            .unwrap_or("request rejected by API");
        return Err(ApiError::Rejected(message.to_string()));
    }

    let missing: Vec<&'static str> = ENVELOPE_FIELDS
        .into_iter()
        .filter(|f| !obj.contains_key(*f))
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::MissingFields(missing));
    }

    let status_code = as_integer(&obj["StatusCode"], "StatusCode")?;
    if status_code != 200 {
        let message = obj
            .get("Message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("StatusCode {status_code}"));
        return Err(ApiError::Rejected(message));
    }
    let total_record_count = as_count(&obj["TotalRecordCount"], "TotalRecordCount")?;
    let record_count = as_count(&obj["RecordCount"], "RecordCount")?;
    let data = match &obj["Data"] {
        Value::Array(items) => items.clone(),
        // An empty page may come back as null
        Value::Null => Vec::new(),
        _ => return Err(ApiError::Malformed("Data is not an array".into())),
    };

    if data.len() as u64 != record_count {
        return Err(ApiError::CountMismatch {
            expected: record_count,
            actual: data.len() as u64,
        });
    }

    Ok(Envelope {
        status_code,
        total_record_count,
        record_count,
        data,
    })
}

/// Numbers sometimes arrive as strings
fn as_integer(value: &Value, field: &str) -> Result<i64, ApiError> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ApiError::Malformed(format!("{field} is not an integer")))
}

fn as_count(value: &Value, field: &str) -> Result<u64, ApiError> {
    let n = as_integer(value, field)?;
    u64::try_from(n).map_err(|_| ApiError::Malformed(format!("{field} is negative")))
}
