//! Allow-list HTML sanitizer producing well-formed XHTML fragments.

use std::collections::{BTreeMap, BTreeSet};

use scraper::{ElementRef, Html};

const VOID_TAGS: &[&str] = &["br", "hr", "img", "wbr"];

/// Tags whose content is dropped along with the tag.
const DROP_WITH_CONTENT: &[&str] = &["script", "style", "noscript", "iframe", "template"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeConfig {
    pub allowed_tags: BTreeSet<String>,
    /// Allowed attributes per tag; the `*` entry applies to every tag.
    pub allowed_attributes: BTreeMap<String, BTreeSet<String>>,
    /// Keep images that point at other hosts.
    pub allow_external: bool,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        let allowed_tags = [
            "a", "abbr", "b", "blockquote", "br", "caption", "center", "code", "del", "div",
            "em", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i", "img", "ins", "li", "ol", "p",
            "pre", "s", "small", "span", "strike", "strong", "sub", "sup", "table", "tbody",
            "td", "tfoot", "th", "thead", "tr", "u", "ul",
        ];
        let mut allowed_attributes = BTreeMap::new();
        allowed_attributes.insert("a".to_string(), set(&["href", "name", "title"]));
        allowed_attributes.insert(
            "img".to_string(),
            set(&["src", "alt", "title", "width", "height"]),
        );
        allowed_attributes.insert("*".to_string(), set(&["id"]));
        Self {
            allowed_tags: set(&allowed_tags),
            allowed_attributes,
            allow_external: true,
        }
    }
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl SanitizeConfig {
    fn attribute_allowed(&self, tag: &str, attr: &str) -> bool {
        [tag, "*"].iter().any(|key| {
            self.allowed_attributes
                .get(*key)
                .is_some_and(|attrs| attrs.contains(attr))
        })
    }
}

pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, html: &str, config: &SanitizeConfig) -> String;
}

/// Walks the parsed fragment and re-serializes only allowed markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlSanitizer;

impl Sanitizer for HtmlSanitizer {
    fn sanitize(&self, html: &str, config: &SanitizeConfig) -> String {
        let fragment = Html::parse_fragment(html);
        let mut out = String::with_capacity(html.len());
        write_children(fragment.root_element(), config, &mut out);
        out
    }
}

fn write_children(parent: ElementRef<'_>, config: &SanitizeConfig, out: &mut String) {
    for child in parent.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(&xml_escape(text));
            continue;
        }
        let Some(element) = ElementRef::wrap(child) else {
            continue;
        };
        let tag = element.value().name().to_ascii_lowercase();
        if DROP_WITH_CONTENT.contains(&tag.as_str()) {
            continue;
        }
        if !config.allowed_tags.contains(&tag) {
            write_children(element, config, out);
            continue;
        }
        if tag == "img" && !config.allow_external && is_external(element.value().attr("src")) {
            continue;
        }

        out.push('<');
        out.push_str(&tag);
        let mut attrs = element
            .value()
            .attrs()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .filter(|(name, value)| {
                config.attribute_allowed(&tag, name) && !is_script_url(name, value)
            })
            .collect::<Vec<_>>();
        attrs.sort();
        for (name, value) in attrs {
            out.push_str(&format!(" {name}=\"{}\"", xml_escape(value)));
        }

        if VOID_TAGS.contains(&tag.as_str()) {
            out.push_str(" />");
            continue;
        }
        out.push('>');
        write_children(element, config, out);
        out.push_str(&format!("</{tag}>"));
    }
}

fn is_external(src: Option<&str>) -> bool {
    src.is_some_and(|src| {
        let src = src.trim_start().to_ascii_lowercase();
        src.starts_with("http://") || src.starts_with("https://") || src.starts_with("//")
    })
}

fn is_script_url(name: &str, value: &str) -> bool {
    (name == "href" || name == "src")
        && value
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("javascript:")
}

pub fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitize(html: &str) -> String {
        HtmlSanitizer.sanitize(html, &SanitizeConfig::default())
    }

    #[test]
    fn drops_scripts_and_unknown_tags_but_keeps_text() {
        let out = sanitize(
            r#"<div class="bbWrapper"><script>alert(1)</script><font color="red">Hello</font> <b>world</b></div>"#,
        );
        assert_eq!(out, "<div>Hello <b>world</b></div>");
    }

    #[test]
    fn void_tags_are_self_closed() {
        let out = sanitize(r#"line<br>next<img src="a.png" alt="A" onerror="x()">"#);
        assert_eq!(out, r#"line<br />next<img alt="A" src="a.png" />"#);
    }

    #[test]
    fn script_urls_are_removed() {
        let out = sanitize(r#"<a href="javascript:alert(1)" title="t">x</a>"#);
        assert_eq!(out, r#"<a title="t">x</a>"#);
    }

    #[test]
    fn external_images_follow_config() {
        let html = r#"<p><img src="https://cdn.example/x.png" /><img src="local.png" /></p>"#;
        let mut config = SanitizeConfig::default();
        assert_eq!(HtmlSanitizer.sanitize(html, &config).matches("<img").count(), 2);

        config.allow_external = false;
        let out = HtmlSanitizer.sanitize(html, &config);
        assert_eq!(out, r#"<p><img src="local.png" /></p>"#);
    }

    #[test]
    fn text_is_escaped_and_utf8_preserved() {
        let out = sanitize("<p>日本語 &amp; 1 &lt; 2</p>");
        assert_eq!(out, "<p>日本語 &amp; 1 &lt; 2</p>");
    }
}
