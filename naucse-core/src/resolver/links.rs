//! Lesson references embedded in rendered HTML.
//!
//! Older renderers link to lessons the course never lists, as
//! `<a href="naucse:page?lesson=beginners-install">`. Those lessons have to
//! be archived too. Only `href` and `src` attributes of real elements count;
//! comments, text and other attributes are ignored.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use url::Url;

static LINK_ELEMENTS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[href], [src]").expect("valid selector"));

const LINK_ATTRS: [&str; 2] = ["href", "src"];

/// The URL form of a cross-lesson link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkScheme {
    pub scheme: String,
    pub path: String,
    pub param: String,
}

impl Default for LinkScheme {
    fn default() -> Self {
        Self { scheme: "naucse".into(), path: "page".into(), param: "lesson".into() }
    }
}

impl LinkScheme {
    /// Lesson slugs referenced from `href`/`src` attributes in `html`, in
    /// document order.
    pub fn find_lesson_slugs(&self, html: &str) -> Vec<String> {
        let fragment = Html::parse_fragment(html);
        fragment
            .select(&LINK_ELEMENTS)
            .flat_map(|element| {
                LINK_ATTRS.iter().filter_map(move |name| element.value().attr(name))
            })
            .flat_map(|link| self.slugs_in_link(link))
            .collect()
    }

    fn slugs_in_link(&self, link: &str) -> Vec<String> {
        let Ok(url) = Url::parse(link) else {
            return Vec::new();
        };
        if url.scheme() != self.scheme || url.path() != self.path {
            return Vec::new();
        }
        url.query_pairs()
            .filter(|(key, _)| *key == *self.param)
            .map(|(_, value)| value.into_owned())
            .collect()
    }
}
