use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// 单个字段的校验失败
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// 以数据形式描述的校验规则，由 validate 统一求值
#[derive(Debug, Clone, Copy)]
pub enum Rule {
    Required,
    Nullable,
    AllowEmpty,
    MinLen(usize),
    MaxLen(usize),
    Alphanum,
    Email,
    Bool,
    UuidArray,
    OneOfArray(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub label: &'static str,
    pub rules: &'static [Rule],
}

fn has_rule(field: &Field, matches: impl Fn(&Rule) -> bool) -> bool {
    field.rules.iter().any(matches)
}

/// 按 schema 校验一份请求载荷。
///
/// 返回剔除未知键后的字段表和全部校验错误。错误不短路，
/// 一次性收集所有字段的问题；每个字段只报告第一条失败的规则。
pub fn validate(schema: &[Field], payload: &Value) -> (Map<String, Value>, Vec<FieldError>) {
    let mut values = Map::new();
    let mut errors = Vec::new();
    let empty = Map::new();
    let payload = payload.as_object().unwrap_or(&empty);

    for field in schema {
        let value = payload.get(field.name);
        match check_field(field, value) {
            Ok(Some(normalized)) => {
                values.insert(field.name.to_string(), normalized);
            }
            Ok(None) => {}
            Err(message) => errors.push(FieldError::new(field.name, message)),
        }
    }
    (values, errors)
}

fn check_field(field: &Field, value: Option<&Value>) -> Result<Option<Value>, String> {
    let label = field.label;
    let Some(value) = value else {
        if has_rule(field, |r| matches!(r, Rule::Required)) {
            return Err(format!("\"{label}\" is required"));
        }
        return Ok(None);
    };

    if value.is_null() {
        if has_rule(field, |r| matches!(r, Rule::Nullable)) {
            return Ok(Some(Value::Null));
        }
        return Err(format!("\"{label}\" is required"));
    }

    for rule in field.rules {
        match rule {
            Rule::Required | Rule::Nullable | Rule::AllowEmpty => {}
            Rule::Bool => {
                if !value.is_boolean() {
                    return Err(format!("\"{label}\" must be a boolean"));
                }
            }
            Rule::MinLen(min) => {
                let s = expect_str(label, value)?;
                let allow_empty = has_rule(field, |r| matches!(r, Rule::AllowEmpty));
                if !(allow_empty && s.is_empty()) && s.chars().count() < *min {
                    return Err(format!(
                        "\"{label}\" length must be at least {min} characters long"
                    ));
                }
            }
            Rule::MaxLen(max) => {
                let s = expect_str(label, value)?;
                if s.chars().count() > *max {
                    return Err(format!(
                        "\"{label}\" length must be less than or equal to {max} characters long"
                    ));
                }
            }
            Rule::Alphanum => {
                let s = expect_str(label, value)?;
                if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(format!(
                        "\"{label}\" must only contain alpha-numeric characters"
                    ));
                }
            }
            Rule::Email => {
                let s = expect_str(label, value)?;
                let valid = s.split_once('@').is_some_and(|(local, domain)| {
                    !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
                });
                if !valid {
                    return Err(format!("\"{label}\" must be a valid email"));
                }
            }
            Rule::UuidArray => {
                let items = expect_array(label, value)?;
                let ok = items
                    .iter()
                    .all(|v| v.as_str().is_some_and(|s| Uuid::parse_str(s).is_ok()));
                if !ok {
                    return Err(format!("\"{label}\" must only contain valid ids"));
                }
            }
            Rule::OneOfArray(allowed) => {
                let items = expect_array(label, value)?;
                let ok = items
                    .iter()
                    .all(|v| v.as_str().is_some_and(|s| allowed.contains(&s)));
                if !ok {
                    return Err(format!("\"{label}\" contains an invalid value"));
                }
            }
        }
    }

    // 字符串统一去除首尾空白
    if let Some(s) = value.as_str() {
        return Ok(Some(Value::String(s.trim().to_string())));
    }
    Ok(Some(value.clone()))
}

fn expect_str<'a>(label: &str, value: &'a Value) -> Result<&'a str, String> {
    value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| format!("\"{label}\" must be a string"))
}

fn expect_array<'a>(label: &str, value: &'a Value) -> Result<&'a Vec<Value>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("\"{label}\" must be an array"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &[Field] = &[
        Field {
            name: "name",
            label: "Name",
            rules: &[Rule::Required, Rule::MinLen(2), Rule::MaxLen(50)],
        },
        Field {
            name: "description",
            label: "Description",
            rules: &[Rule::Required, Rule::Nullable, Rule::MaxLen(150)],
        },
        Field {
            name: "active",
            label: "Active",
            rules: &[Rule::Required, Rule::Bool],
        },
    ];

    #[test]
    fn collects_all_errors_without_short_circuit() {
        let (_, errors) = validate(SCHEMA, &json!({ "name": "x", "active": "yes" }));
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].field, "name");
        assert_eq!(
            errors[0].message,
            "\"Name\" length must be at least 2 characters long"
        );
        assert_eq!(errors[1].field, "description");
        assert_eq!(errors[2].message, "\"Active\" must be a boolean");
    }

    #[test]
    fn strips_unknown_fields_and_trims_strings() {
        let (values, errors) = validate(
            SCHEMA,
            &json!({
                "name": "  Editors  ",
                "description": null,
                "active": false,
                "injected": "ignored"
            }),
        );
        assert!(errors.is_empty());
        assert_eq!(values.get("name"), Some(&json!("Editors")));
        assert_eq!(values.get("description"), Some(&Value::Null));
        assert!(!values.contains_key("injected"));
    }

    #[test]
    fn nullable_rejects_null_only_when_absent_from_rules() {
        let (_, errors) = validate(SCHEMA, &json!({ "name": null, "description": null, "active": true }));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "\"Name\" is required");
    }

    #[test]
    fn allow_empty_bypasses_min_len() {
        let schema = &[Field {
            name: "password",
            label: "Password",
            rules: &[Rule::Required, Rule::AllowEmpty, Rule::MinLen(5)],
        }];
        let (_, errors) = validate(schema, &json!({ "password": "" }));
        assert!(errors.is_empty());
        let (_, errors) = validate(schema, &json!({ "password": "abc" }));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn email_and_alphanum_rules() {
        let schema = &[
            Field {
                name: "username",
                label: "Username",
                rules: &[Rule::Required, Rule::Alphanum],
            },
            Field {
                name: "email",
                label: "Email",
                rules: &[Rule::Required, Rule::Email],
            },
        ];
        let (_, errors) = validate(
            schema,
            &json!({ "username": "bad name", "email": "nobody@nowhere" }),
        );
        assert_eq!(errors.len(), 2);
        let (_, errors) = validate(
            schema,
            &json!({ "username": "admin01", "email": "admin@example.com" }),
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn uuid_array_rejects_malformed_ids() {
        let schema = &[Field {
            name: "roles",
            label: "Roles",
            rules: &[Rule::Required, Rule::UuidArray],
        }];
        let (_, errors) = validate(schema, &json!({ "roles": ["not-a-uuid"] }));
        assert_eq!(errors.len(), 1);
        let (_, errors) = validate(
            schema,
            &json!({ "roles": ["01890a5d-ac96-774b-bcce-b302099a8057"] }),
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn one_of_array_is_all_or_nothing() {
        let schema = &[Field {
            name: "permissions",
            label: "Permissions",
            rules: &[Rule::Required, Rule::OneOfArray(&["ROLE_READ", "ROLE_UPDATE"])],
        }];
        let (_, errors) = validate(
            schema,
            &json!({ "permissions": ["ROLE_READ", "BOGUS"] }),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].message,
            "\"Permissions\" contains an invalid value"
        );
    }
}
