//! Backing function identifiers
//!
//! Endpoints name functions by their full ARN:
//! `arn:<partition>:lambda:<region>:<account>:function:<name>[:<qualifier>]`.
//! The integration and authorizer URIs and the permission source ARN are all
//! derived from its components.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

const INVOKE_PREFIX: &str = "/functions/";
const INVOKE_SUFFIX: &str = "/invocations";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid function identifier '{0}'")]
pub struct FunctionArnError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionArn {
    pub partition: String,
    pub region: String,
    pub account: String,
    pub name: String,
    pub qualifier: Option<String>,
}

impl FunctionArn {
    /// Path the REST API calls to invoke this function
    pub fn invoke_uri(&self) -> String {
        format!(
            "arn:{}:apigateway:{}:lambda:path/2015-03-31/functions/{}/invocations",
            self.partition, self.region, self
        )
    }

    /// Recover the function from an integration or authorizer URI
    pub fn from_invoke_uri(uri: &str) -> Option<Self> {
        let start = uri.find(INVOKE_PREFIX)? + INVOKE_PREFIX.len();
        let rest = &uri[start..];
        let end = rest.find(INVOKE_SUFFIX)?;
        rest[..end].parse().ok()
    }

    /// Source ARN that lets every stage and method of `api_id` invoke the function
    pub fn execute_api_source_arn(&self, api_id: &str) -> String {
        format!(
            "arn:{}:execute-api:{}:{}:{}/*/*",
            self.partition, self.region, self.account, api_id
        )
    }

    /// Deterministic authorizer name, so lookup by name is lookup by function.
    ///
    /// The suffix hashes the full ARN: same-named functions in other accounts
    /// or regions get distinct authorizers.
    pub fn authorizer_name(&self) -> String {
        let digest = hex::encode(Sha256::digest(self.to_string().as_bytes()));
        match &self.qualifier {
            Some(q) => format!("{}-{}-authorizer-{}", self.name, q, &digest[..8]),
            None => format!("{}-authorizer-{}", self.name, &digest[..8]),
        }
    }
}

impl FromStr for FunctionArn {
    type Err = FunctionArnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let well_formed = matches!(parts.len(), 7 | 8)
            && parts[0] == "arn"
            && parts[2] == "lambda"
            && parts[5] == "function"
            && parts.iter().all(|p| !p.is_empty());
        if !well_formed {
            return Err(FunctionArnError(s.to_string()));
        }

        Ok(Self {
            partition: parts[1].to_string(),
            region: parts[3].to_string(),
            account: parts[4].to_string(),
            name: parts[6].to_string(),
            qualifier: parts.get(7).map(|q| q.to_string()),
        })
    }
}

impl fmt::Display for FunctionArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:lambda:{}:{}:function:{}",
            self.partition, self.region, self.account, self.name
        )?;
        if let Some(q) = &self.qualifier {
            write!(f, ":{}", q)?;
        }
        Ok(())
    }
}
