//! Component description resolved from a `CreateComponent` request.

use std::collections::BTreeMap;

use crate::bridge::protocol::ComponentRequest;

/// Name/value parameters with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(BTreeMap<String, String>);

impl Parameters {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_uppercase()).map(String::as_str)
    }

    /// Later duplicates replace earlier ones.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_uppercase(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names are reported uppercased.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::default();
        for (k, v) in iter {
            params.insert(k.as_ref(), v);
        }
        params
    }
}

/// Credentials the controller supplied for fetching component code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub realm: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSpec {
    pub context_id: String,
    pub component_id: String,
    pub name: String,
    /// Dotted class name, without a `.class`/`.java` suffix.
    pub class_name: String,
    pub base_url: String,
    pub code_base: String,
    /// Sorted, de-duplicated archive names.
    pub archives: Vec<String>,
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub credentials: Credentials,
    pub params: Parameters,
}

impl ComponentSpec {
    pub fn from_request(request: ComponentRequest) -> Self {
        let mut params: Parameters = request.params.into_iter().collect();

        let code_base = if request.code_base.trim().is_empty() {
            params.get("CODEBASE").unwrap_or_default().to_string()
        } else {
            request.code_base
        };

        let archive_list = merge_archives(&request.archives, &mut params);

        Self {
            context_id: request.context_id,
            component_id: request.component_id,
            name: request.name,
            class_name: normalize_class_name(&request.class_name),
            base_url: request.base_url,
            code_base,
            archives: split_archives(&archive_list),
            width: request.width.trim().parse().unwrap_or(0),
            height: request.height.trim().parse().unwrap_or(0),
            title: request.title,
            credentials: Credentials {
                user: request.user,
                password: request.password,
                realm: request.auth_realm,
            },
            params,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }
}

fn merge_archives(attribute: &str, params: &mut Parameters) -> String {
    let attribute = attribute.trim();
    let param = params.get("ARCHIVE").map(str::trim).map(str::to_string);
    match (attribute.is_empty(), param) {
        (true, Some(param)) => param,
        (true, None) => String::new(),
        (false, Some(param)) if !param.is_empty() && !param.ends_with(".cab") => {
            format!("{param},{attribute}")
        }
        (false, Some(_)) => attribute.to_string(),
        (false, None) => {
            params.insert("ARCHIVE", attribute);
            attribute.to_string()
        }
    }
}

fn split_archives(list: &str) -> Vec<String> {
    let mut archives: Vec<String> = list
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();
    archives.sort();
    archives.dedup();
    archives
}

fn normalize_class_name(raw: &str) -> String {
    let raw = raw.trim();
    let stem = raw
        .strip_suffix(".class")
        .or_else(|| raw.strip_suffix(".java"))
        .unwrap_or(raw);
    stem.replace('/', ".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(archives: &str, params: &[(&str, &str)]) -> ComponentRequest {
        ComponentRequest {
            context_id: "c1".into(),
            component_id: "a1".into(),
            name: "demo".into(),
            class_name: "org/example/Demo.class".into(),
            base_url: "http://example.org/page.html".into(),
            user: String::new(),
            password: String::new(),
            auth_realm: String::new(),
            code_base: String::new(),
            archives: archives.into(),
            width: "320".into(),
            height: "tall".into(),
            title: "Demo".into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn normalizes_names_and_dimensions() {
        let spec = ComponentSpec::from_request(request("", &[("Color", "red")]));
        assert_eq!(spec.class_name, "org.example.Demo");
        assert_eq!((spec.width, spec.height), (320, 0));
        assert_eq!(spec.param("COLOR"), Some("red"));
        assert_eq!(spec.param("color"), Some("red"));
        assert_eq!(normalize_class_name("a/b/C.java"), "a.b.C");
    }

    #[test]
    fn codebase_falls_back_to_parameter() {
        let spec = ComponentSpec::from_request(request("", &[("codebase", "classes/")]));
        assert_eq!(spec.code_base, "classes/");
    }

    #[test]
    fn archive_parameter_is_merged() {
        let spec = ComponentSpec::from_request(request("b.jar, a.jar", &[("archive", "c.jar")]));
        assert_eq!(spec.archives, ["a.jar", "b.jar", "c.jar"]);

        let spec = ComponentSpec::from_request(request("b.jar", &[("ARCHIVE", "old.cab")]));
        assert_eq!(spec.archives, ["b.jar"]);

        let spec = ComponentSpec::from_request(request("", &[("ARCHIVE", "x.jar,x.jar")]));
        assert_eq!(spec.archives, ["x.jar"]);
    }

    #[test]
    fn archive_parameter_is_synthesised() {
        let spec = ComponentSpec::from_request(request("a.jar,b.jar", &[]));
        assert_eq!(spec.param("archive"), Some("a.jar,b.jar"));
        assert_eq!(spec.archives, ["a.jar", "b.jar"]);
    }
}
