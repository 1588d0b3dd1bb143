//! HTML form scraping and the page adapters built on it.

pub mod adapters;
pub mod parser;

pub use adapters::{classify, resolve, AdapterKind, IdpSelection, PageAdapter};
pub use parser::{
    decode_html, parse_page, FieldKind, Form, FormField, FormFields, FormMethod, FormParser, ParsedPage,
    SelectField, SelectOption, Submitter,
};
