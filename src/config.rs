use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::regions;
use crate::resources::{verify_bucket_name, LambdaFunction};
use crate::template::validate_stack_name;

pub const CONFIG_FILE_NAME: &str = "sitestack.toml";
pub const ENV_PREFIX: &str = "SITESTACK_";

/// How the CDN is allowed to read from the bucket. Exactly one model
/// is used per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AccessModel {
    /// the bucket is world readable through a bucket policy, and CloudFront
    /// talks to the bucket's website endpoint over http.
    #[default]
    Public,
    /// the bucket stays private. CloudFront signs its requests (SigV4)
    /// with an Origin Access Control and talks to the regional endpoint.
    OriginAccessControl,
}

impl std::str::FromStr for AccessModel {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "public" => Ok(AccessModel::Public),
            "origin-access-control" | "oac" => Ok(AccessModel::OriginAccessControl),
            x => Err(format!("Unknown access model {x:?}. Expected `public` or `origin-access-control`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GeoRestriction {
    #[default]
    None,
    Whitelist { locations: Vec<String> },
    Blacklist { locations: Vec<String> },
}

/// Where the invalidation function's code comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FunctionCode {
    /// a zip archive in an artifact bucket, uploaded by `sitestack package`.
    /// the object key is passed to the stack as a parameter.
    Archive {
        artifact_bucket: String,
        #[serde(default = "default_archive_runtime")]
        runtime: String,
        #[serde(default = "default_archive_handler")]
        handler: String,
    },
    /// source code placed directly in the template. Only interpreted
    /// runtimes support this.
    Inline {
        runtime: String,
        handler: String,
        source: String,
    },
}

fn default_archive_runtime() -> String {
    "provided.al2023".into()
}

fn default_archive_handler() -> String {
    "bootstrap".into()
}

impl FunctionCode {
    pub fn runtime(&self) -> &str {
        match self {
            FunctionCode::Archive { runtime, .. } | FunctionCode::Inline { runtime, .. } => runtime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InvalidationConfig {
    /// physical name of the function. The CI role is allowed to invoke it by this name.
    pub function_name: String,
    /// memory to give your function (in MB). Defaults to 128.
    /// Valid values: 128 - 10240
    pub memory_size: u32,
    /// timeout of your function (in seconds). Defaults to 30.
    /// Valid values: 1 - 900
    pub timeout: u32,
    /// `arm64` or `x86_64`. Must match the architecture the bootstrap was built for.
    pub architecture: String,
    pub code: FunctionCode,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            function_name: "invalidateCacheLambda".into(),
            memory_size: 128,
            timeout: 30,
            architecture: "arm64".into(),
            code: FunctionCode::Archive {
                artifact_bucket: String::new(),
                runtime: default_archive_runtime(),
                handler: default_archive_handler(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CiRoleConfig {
    /// `owner/repo` of the GitHub repository allowed to assume the role.
    pub repository: String,
    /// only workflows running on this branch may assume the role.
    pub branch: String,
    pub audience: String,
    /// set to true if the account does not have the GitHub OIDC provider yet.
    /// Only one provider per url may exist in an account.
    pub create_oidc_provider: bool,
    /// physical role name. Left empty, CloudFormation generates one.
    pub role_name: String,
}

impl Default for CiRoleConfig {
    fn default() -> Self {
        Self {
            repository: String::new(),
            branch: "main".into(),
            audience: "sts.amazonaws.com".into(),
            create_oidc_provider: false,
            role_name: String::new(),
        }
    }
}

impl CiRoleConfig {
    /// the exact `sub` claim GitHub puts in tokens for pushes to the branch.
    pub fn subject(&self) -> String {
        format!("repo:{}:ref:refs/heads/{}", self.repository, self.branch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// if left empty, the stack is named after the site name
    /// with dots replaced by dashes.
    pub stack_name: String,
    /// region the stack is deployed to. Defaults to us-east-1.
    pub region: String,
    /// physical name of the bucket that holds the site. Required.
    pub bucket_name: String,
    /// Route 53 hosted zone that owns `site_name`. Required.
    /// A leading `/hostedzone/` is accepted and stripped.
    pub hosted_zone_id: String,
    /// ACM certificate ARN for `site_name`. Must be issued in us-east-1. Required.
    pub acm_certificate: String,
    /// the public hostname of the site, eg: `www.example.com`. Required.
    pub site_name: String,
    pub access: AccessModel,
    pub index_document: String,
    pub error_document: String,
    pub geo_restriction: GeoRestriction,
    /// also serve the site over IPv6 and create an AAAA alias record.
    pub ipv6: bool,
    pub invalidation: Option<InvalidationConfig>,
    pub ci_role: Option<CiRoleConfig>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            stack_name: String::new(),
            region: "us-east-1".into(),
            bucket_name: String::new(),
            hosted_zone_id: String::new(),
            acm_certificate: String::new(),
            site_name: String::new(),
            access: AccessModel::default(),
            index_document: "index.html".into(),
            error_document: "error.html".into(),
            geo_restriction: GeoRestriction::default(),
            ipv6: false,
            invalidation: None,
            ci_role: None,
        }
    }
}

impl SiteConfig {
    /// reads the config file (if any), then applies the .env file (if any),
    /// then the process environment. Later sources win.
    pub fn load(config_path: Option<&Path>, dot_env_path: Option<&Path>) -> Result<Self> {
        let mut conf = match config_path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        if let Some(path) = dot_env_path {
            let contents = std::fs::read_to_string(path)?;
            conf.apply_overrides(&parse_dot_env(&contents))?;
        }
        let process_env: HashMap<String, String> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        conf.apply_overrides(&process_env)?;
        conf.normalize();
        tracing::debug!(stack = %conf.stack_name, region = %conf.region, access = ?conf.access, "loaded site config");
        Ok(conf)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// applies `SITESTACK_*` variables on top of the current values.
    /// `REPOSITORY` and `ARTIFACT_BUCKET` only change a ci role or an
    /// invalidation function already declared in the config file.
    pub fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        for (key, val) in vars {
            let name = match key.strip_prefix(ENV_PREFIX) {
                Some(n) => n,
                None => continue,
            };
            match name {
                "STACK_NAME" => self.stack_name = val.clone(),
                "REGION" => self.region = val.clone(),
                "BUCKET_NAME" => self.bucket_name = val.clone(),
                "HOSTED_ZONE_ID" => self.hosted_zone_id = val.clone(),
                "ACM_CERTIFICATE" => self.acm_certificate = val.clone(),
                "SITE_NAME" => self.site_name = val.clone(),
                "ACCESS" => self.access = val.parse().map_err(Error::InvalidConfig)?,
                "REPOSITORY" => match &mut self.ci_role {
                    Some(ci) => ci.repository = val.clone(),
                    None => tracing::warn!("ignoring {key}, no [ci_role] is declared"),
                },
                "ARTIFACT_BUCKET" => match self.invalidation.as_mut().map(|inv| &mut inv.code) {
                    Some(FunctionCode::Archive { artifact_bucket, .. }) => *artifact_bucket = val.clone(),
                    Some(FunctionCode::Inline { .. }) => tracing::warn!("ignoring {key}, the invalidation function is inline"),
                    None => tracing::warn!("ignoring {key}, no [invalidation] is declared"),
                },
                // read by the command line, not part of the site
                "CONFIG" | "CODE_KEY" => {}
                x => tracing::warn!("ignoring unknown setting {ENV_PREFIX}{x}"),
            }
        }
        Ok(())
    }

    /// fills derived defaults. Safe to call more than once.
    pub fn normalize(&mut self) {
        if let Some(id) = self.hosted_zone_id.strip_prefix("/hostedzone/") {
            self.hosted_zone_id = id.to_string();
        }
        if self.stack_name.is_empty() && !self.site_name.is_empty() {
            let mut stack_name = self.site_name.replace('.', "-");
            stack_name.truncate(128);
            self.stack_name = stack_name;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("bucket_name", "BUCKET_NAME", &self.bucket_name),
            ("hosted_zone_id", "HOSTED_ZONE_ID", &self.hosted_zone_id),
            ("acm_certificate", "ACM_CERTIFICATE", &self.acm_certificate),
            ("site_name", "SITE_NAME", &self.site_name),
        ];
        for (name, env_name, value) in required {
            if value.is_empty() {
                return Err(Error::MissingSetting(name, env_name));
            }
        }
        if let Some(err) = self.is_invalid() {
            return Err(Error::InvalidConfig(err));
        }
        Ok(())
    }

    fn is_invalid(&self) -> Option<String> {
        if let Some(err) = validate_stack_name(&self.stack_name) { return Some(err) }
        if let Some(err) = regions::verify_region(&self.region) { return Some(err) }
        if let Some(err) = verify_bucket_name(&self.bucket_name) { return Some(err) }
        if let Some(err) = regions::verify_cloudfront_certificate(&self.acm_certificate) { return Some(err) }
        if self.hosted_zone_id.contains('/') || !self.hosted_zone_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Some(format!("Invalid hosted zone id {:?}\nExpected the bare id, eg: Z0123456789ABCDEFGHIJ", self.hosted_zone_id));
        }
        if self.site_name.contains('*') || !self.site_name.contains('.') {
            return Some(format!("Invalid site name {:?}\nMust be a fully qualified hostname without wildcards", self.site_name));
        }
        for doc in [&self.index_document, &self.error_document] {
            if doc.is_empty() || doc.starts_with('/') {
                return Some(format!("Invalid document {:?}\nMust be an object key relative to the bucket root", doc));
            }
        }
        match &self.geo_restriction {
            GeoRestriction::None => {}
            GeoRestriction::Whitelist { locations } | GeoRestriction::Blacklist { locations } => {
                if locations.is_empty() {
                    return Some("Geo restriction lists must contain at least one country code".into());
                }
                if let Some(bad) = locations.iter().find(|l| l.len() != 2 || !l.chars().all(|c| c.is_ascii_uppercase())) {
                    return Some(format!("Invalid country code {:?}\nMust be an ISO 3166-1 alpha-2 code, eg: US", bad));
                }
            }
        }
        if let Some(inv) = &self.invalidation {
            if let Some(err) = inv.is_invalid() { return Some(err) }
        }
        if let Some(ci) = &self.ci_role {
            if let Some(err) = ci.is_invalid() { return Some(err) }
        }
        None
    }
}

impl InvalidationConfig {
    fn is_invalid(&self) -> Option<String> {
        if let Some(err) = LambdaFunction::verify_function_name(&self.function_name) { return Some(err) }
        if let Some(err) = LambdaFunction::verify_limits(self.memory_size, self.timeout) { return Some(err) }
        if self.architecture != "arm64" && self.architecture != "x86_64" {
            return Some(format!("Invalid architecture {:?}\nMust be either `arm64` or `x86_64`", self.architecture));
        }
        match &self.code {
            FunctionCode::Archive { artifact_bucket, runtime, handler } => {
                if artifact_bucket.is_empty() {
                    return Some("The invalidation function needs an artifact_bucket to load its code archive from".into());
                }
                if let Some(err) = verify_bucket_name(artifact_bucket) { return Some(err) }
                if runtime.is_empty() || handler.is_empty() {
                    return Some("Function runtime and handler must not be empty".into());
                }
            }
            FunctionCode::Inline { runtime, handler, source } => {
                if !(runtime.starts_with("python") || runtime.starts_with("nodejs")) {
                    return Some(format!("Inline code is only supported for python and nodejs runtimes, found {runtime:?}"));
                }
                if handler.is_empty() || source.trim().is_empty() {
                    return Some("Inline function code needs a handler and source".into());
                }
            }
        }
        None
    }
}

impl CiRoleConfig {
    fn is_invalid(&self) -> Option<String> {
        let parts: Vec<&str> = self.repository.split('/').collect();
        let valid_part = |p: &&str| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if parts.len() != 2 || !parts.iter().all(valid_part) {
            return Some(format!("Invalid repository {:?}\nMust be `owner/repo` without wildcards", self.repository));
        }
        if self.branch.is_empty() || self.branch.contains('*') || self.branch.contains('?') {
            return Some(format!("Invalid branch {:?}\nMust be a single branch name without wildcards", self.branch));
        }
        if self.audience.is_empty() {
            return Some("The OIDC audience must not be empty".into());
        }
        None
    }
}

/// parses `KEY=value` lines. Blank lines and `#` comments are skipped,
/// and one pair of surrounding quotes is removed from the value.
pub fn parse_dot_env(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, val)) = line.split_once('=') {
            let val = val.trim();
            let unquoted = val.strip_prefix('"').and_then(|v| v.strip_suffix('"'))
                .or_else(|| val.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(val);
            map.insert(key.trim().to_string(), unquoted.to_string());
        }
    }
    map
}

/// given a search dir, see if sitestack.toml exists in this dir,
/// and if so, return the path to it. If not found, back up 1 dir at a time
/// until a config file is found (limit 5 times)
pub fn find_closest_config(mut search_dir: PathBuf) -> Option<PathBuf> {
    for _ in 0..5 {
        search_dir.push(CONFIG_FILE_NAME);
        if search_dir.is_file() {
            return Some(search_dir);
        }
        search_dir.pop();
        if !search_dir.pop() {
            break;
        }
    }
    None
}
