use anyhow::Result;
use minijinja::Environment;
use rust_embed::Embed;
use serde::Serialize;

#[derive(Embed)]
#[folder = "templates"]
struct Templates;

/// HTML templates compiled once at startup.
pub struct Views {
    env: Environment<'static>,
}

impl Views {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();

        for name in Templates::iter() {
            let Some(file) = Templates::get(&name) else {
                continue;
            };
            let source = String::from_utf8(file.data.into_owned())
                .map_err(|e| anyhow::anyhow!("template {name} is not valid utf-8: {e}"))?;
            env.add_template_owned(name.to_string(), source)?;
            tracing::debug!(template = %name, "loaded template");
        }

        Ok(Views { env })
    }

    pub fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String, minijinja::Error> {
        self.env.get_template(name)?.render(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    #[test]
    fn test_all_pages_load() {
        let views = Views::new().unwrap();
        for name in ["index.html", "add.html", "edit.html", "base.html", "_form.html"] {
            assert!(views.env.get_template(name).is_ok(), "missing {name}");
        }
    }

    #[test]
    fn test_output_is_escaped() {
        let views = Views::new().unwrap();
        let html = views
            .render(
                "index.html",
                context! {
                    books => vec![context! { id => 1, title => "<b>Dune</b>", author => "Frank Herbert", review => 8.0 }],
                    num_books => 1,
                    messages => Vec::<String>::new(),
                },
            )
            .unwrap();
        assert!(html.contains("&lt;b&gt;Dune&lt;&#x2f;b&gt;"), "{html}");
        assert!(!html.contains("<b>Dune</b>"));
    }
}
