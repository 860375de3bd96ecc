//! checks run on a synthesized template before it is sent anywhere.
//! every violation is collected so one run reports all of them.

use serde_json::Value;

use crate::config::{AccessModel, SiteConfig};
use crate::error::{Error, Result};
use crate::resources::*;
use crate::template::Template;

pub fn check_manifest(template: &Template, conf: &SiteConfig) -> Result<()> {
    let mut violations = vec![];
    if let Err(e) = template.dependency_order() {
        violations.push(e.to_string());
    }
    check_distribution(template, &mut violations);
    check_records(template, &mut violations);
    check_access_model(template, conf, &mut violations);
    check_function(template, &mut violations);
    check_trust(template, conf, &mut violations);
    if violations.is_empty() {
        tracing::debug!("template passed {} manifest checks", template.resources.len());
        Ok(())
    } else {
        Err(Error::ManifestViolations(violations))
    }
}

fn props<'a>(template: &'a Template, id: &str) -> Option<&'a Value> {
    template.resource(id).map(|r| &r.properties)
}

fn check_distribution(template: &Template, violations: &mut Vec<String>) {
    let conf = match props(template, DISTRIBUTION_ID) {
        Some(p) => &p["DistributionConfig"],
        None => {
            violations.push(format!("missing distribution {DISTRIBUTION_ID}"));
            return;
        }
    };
    let target = &conf["DefaultCacheBehavior"]["TargetOriginId"];
    let origins = conf["Origins"].as_array().cloned().unwrap_or_default();
    if !origins.iter().any(|o| &o["Id"] == target) {
        violations.push(format!("default cache behavior targets {target} which is not a declared origin"));
    }
}

fn check_records(template: &Template, violations: &mut Vec<String>) {
    let dist = DistributionRef::new(DISTRIBUTION_ID);
    for (id, record) in template.resources_of_type("AWS::Route53::RecordSet") {
        let alias = &record.properties["AliasTarget"];
        if alias["DNSName"] != dist.domain_name() {
            violations.push(format!("{id} alias does not point at the domain of {DISTRIBUTION_ID}"));
        }
        if alias["HostedZoneId"] != dist.hosted_zone_id() {
            violations.push(format!("{id} alias must use the CloudFront hosted zone {CLOUDFRONT_HOSTED_ZONE_ID}"));
        }
    }
}

fn check_access_model(template: &Template, conf: &SiteConfig, violations: &mut Vec<String>) {
    let has_oac = template.resources_of_type("AWS::CloudFront::OriginAccessControl").next().is_some();
    let policy = props(template, BUCKET_POLICY_ID).map(|p| &p["PolicyDocument"]["Statement"]);
    let public_statements: Vec<&Value> = policy.and_then(|s| s.as_array())
        .map(|s| s.iter().filter(|st| is_public_principal(&st["Principal"])).collect())
        .unwrap_or_default();
    match conf.access {
        AccessModel::Public => {
            if has_oac {
                violations.push("a public bucket must not also use an origin access control".into());
            }
            let expected = Value::Array(vec![Value::String(bucket_objects_arn(&conf.bucket_name))]);
            if public_statements.is_empty() {
                violations.push("a public bucket needs a public read policy".into());
            }
            for st in public_statements {
                if st["Resource"] != expected {
                    violations.push(format!("public read policy resource must be exactly {expected}, found {}", st["Resource"]));
                }
            }
        }
        AccessModel::OriginAccessControl => {
            if !has_oac {
                violations.push("a private bucket needs an origin access control".into());
            }
            if !public_statements.is_empty() {
                violations.push("a bucket behind an origin access control must not have a public read policy".into());
            }
            if let Some(bucket) = props(template, BUCKET_ID) {
                if bucket.get("WebsiteConfiguration").is_some() {
                    violations.push("a bucket behind an origin access control must not be a website endpoint".into());
                }
            }
        }
    }
}

/// `"*"`, `{"AWS": "*"}` and `{"AWS": ["*"]}` all grant everyone
fn is_public_principal(principal: &Value) -> bool {
    match principal {
        Value::String(s) => s == "*",
        Value::Object(map) => match map.get("AWS") {
            Some(Value::String(s)) => s == "*",
            Some(Value::Array(items)) => items.iter().any(|i| i == "*"),
            _ => false,
        },
        _ => false,
    }
}

fn check_function(template: &Template, violations: &mut Vec<String>) {
    for (id, function) in template.resources_of_type("AWS::Lambda::Function") {
        let env = &function.properties["Environment"]["Variables"][DISTRIBUTION_ENV_VAR];
        if *env != get_ref(DISTRIBUTION_ID) {
            violations.push(format!("{id} {DISTRIBUTION_ENV_VAR} must be the Ref of {DISTRIBUTION_ID}, found {env}"));
        }
    }
}

fn check_trust(template: &Template, conf: &SiteConfig, violations: &mut Vec<String>) {
    let ci = match &conf.ci_role {
        Some(c) => c,
        None => return,
    };
    let role = match props(template, CI_ROLE_ID) {
        Some(r) => r,
        None => {
            violations.push(format!("missing CI role {CI_ROLE_ID}"));
            return;
        }
    };
    let statements = role["AssumeRolePolicyDocument"]["Statement"].as_array().cloned().unwrap_or_default();
    let sub_key = format!("{GITHUB_OIDC_HOST}:sub");
    let aud_key = format!("{GITHUB_OIDC_HOST}:aud");
    for st in statements.iter() {
        let conditions = &st["Condition"];
        if conditions.get("StringLike").is_some() {
            violations.push("trust conditions must use StringEquals, not StringLike".into());
        }
        let equals = &conditions["StringEquals"];
        let subject = equals[&sub_key].as_str().unwrap_or_default();
        if subject != ci.subject() || subject.contains('*') {
            violations.push(format!("trust subject must be exactly {:?}, found {subject:?}", ci.subject()));
        }
        let audience = equals[&aud_key].as_str().unwrap_or_default();
        if audience != ci.audience {
            violations.push(format!("trust audience must be {:?}, found {audience:?}", ci.audience));
        }
    }
    if statements.is_empty() {
        violations.push(format!("{CI_ROLE_ID} has no trust statements"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use serde_json::json;

    fn mutate(template: &mut Template, id: &str, f: impl FnOnce(&mut Value)) {
        let resource = template.resources.get_mut(id).unwrap();
        f(&mut resource.properties);
    }

    #[test]
    fn every_revision_passes() {
        for conf in all_revisions() {
            let t = StaticWebsite::from_config(&conf).unwrap();
            check_manifest(&t, &conf).unwrap();
        }
    }

    #[test]
    fn alias_to_a_foreign_domain_is_flagged() {
        let conf = valid_config();
        let mut t = StaticWebsite::from_config(&conf).unwrap();
        mutate(&mut t, RECORD_ID, |p| p["AliasTarget"]["DNSName"] = json!("d111.cloudfront.net"));
        mutate(&mut t, RECORD_ID, |p| p["AliasTarget"]["HostedZoneId"] = json!("Z111"));
        let err = check_manifest(&t, &conf).unwrap_err();
        match err {
            Error::ManifestViolations(v) => assert_eq!(v.len(), 2, "{v:?}"),
            x => panic!("unexpected error {x}"),
        }
    }

    #[test]
    fn widened_public_policy_is_flagged() {
        let conf = valid_config();
        let mut t = StaticWebsite::from_config(&conf).unwrap();
        mutate(&mut t, BUCKET_POLICY_ID, |p| p["PolicyDocument"]["Statement"][0]["Resource"] = json!(["arn:aws:s3:::*"]));
        let err = check_manifest(&t, &conf).unwrap_err().to_string();
        assert!(err.contains("must be exactly"), "{err}");
    }

    #[test]
    fn mixing_access_models_is_flagged() {
        let public = valid_config();
        let gated = gated_with_invalidation();
        let gated_template = StaticWebsite::from_config(&gated).unwrap();
        let err = check_manifest(&gated_template, &public).unwrap_err().to_string();
        assert!(err.contains("must not also use an origin access control"), "{err}");
        let public_template = StaticWebsite::from_config(&public).unwrap();
        let err = check_manifest(&public_template, &gated).unwrap_err().to_string();
        assert!(err.contains("needs an origin access control"), "{err}");
    }

    #[test]
    fn public_statement_in_a_gated_bucket_is_flagged() {
        let conf = gated_with_invalidation();
        for principal in [json!("*"), json!({ "AWS": "*" }), json!({ "AWS": ["*"] })] {
            let mut t = StaticWebsite::from_config(&conf).unwrap();
            mutate(&mut t, BUCKET_POLICY_ID, |p| p["PolicyDocument"]["Statement"][0]["Principal"] = principal.clone());
            let err = check_manifest(&t, &conf).unwrap_err().to_string();
            assert!(err.contains("must not have a public read policy"), "{principal}: {err}");
        }
        assert!(!is_public_principal(&json!({ "Service": "cloudfront.amazonaws.com" })));
    }

    #[test]
    fn function_must_target_this_distribution() {
        let conf = gated_with_invalidation();
        let mut t = StaticWebsite::from_config(&conf).unwrap();
        mutate(&mut t, FUNCTION_ID, |p| p["Environment"]["Variables"][DISTRIBUTION_ENV_VAR] = json!("E2QWRUHAPOMQZL"));
        let err = check_manifest(&t, &conf).unwrap_err().to_string();
        assert!(err.contains("must be the Ref of WebsiteDistribution"), "{err}");
    }

    #[test]
    fn wildcard_subject_is_flagged() {
        let conf = gated_with_everything();
        let mut t = StaticWebsite::from_config(&conf).unwrap();
        mutate(&mut t, CI_ROLE_ID, |p| {
            p["AssumeRolePolicyDocument"]["Statement"][0]["Condition"]["StringEquals"]["token.actions.githubusercontent.com:sub"] = json!("repo:trevorrobertsjr/jtc:*");
        });
        let err = check_manifest(&t, &conf).unwrap_err().to_string();
        assert!(err.contains("trust subject must be exactly"), "{err}");
    }

    #[test]
    fn dangling_reference_is_flagged() {
        let conf = valid_config();
        let mut t = StaticWebsite::from_config(&conf).unwrap();
        t.resources.remove(BUCKET_ID);
        let err = check_manifest(&t, &conf).unwrap_err().to_string();
        assert!(err.contains("Unresolved references"), "{err}");
    }
}
