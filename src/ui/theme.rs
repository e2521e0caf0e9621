use owo_colors::Style;
use std::sync::OnceLock;

static PALETTE: OnceLock<Palette> = OnceLock::new();

/// Styles by the role a piece of CLI output plays
#[derive(Debug, Clone)]
pub struct Palette {
    /// Document ids and section titles
    pub heading: Style,
    pub ok: Style,
    pub failure: Style,
    pub caution: Style,
    /// Field names in `label: value` lines
    pub label: Style,
    /// Secondary text: empty results, timestamps
    pub faint: Style,
    pub tag: Style,
}

impl Palette {
    pub fn colored() -> Self {
        Self {
            heading: Style::new().cyan().bold(),
            ok: Style::new().green().bold(),
            failure: Style::new().red().bold(),
            caution: Style::new().yellow().bold(),
            label: Style::new().white().dimmed(),
            faint: Style::new().bright_black(),
            tag: Style::new().blue(),
        }
    }

    pub fn plain() -> Self {
        let none = Style::new();
        Self {
            heading: none,
            ok: none,
            failure: none,
            caution: none,
            label: none,
            faint: none,
            tag: none,
        }
    }
}

/// Whether to emit ANSI colors. `NO_COLOR` with any non-empty value wins
/// over a terminal.
pub fn wants_color(no_color: Option<&str>, is_term: bool) -> bool {
    is_term && no_color.is_none_or(str::is_empty)
}

/// Palette for stdout, decided once per process
pub fn palette() -> &'static Palette {
    PALETTE.get_or_init(|| {
        let no_color = std::env::var("NO_COLOR").ok();
        let is_term = console::Term::stdout().is_term() && console::colors_enabled();
        if wants_color(no_color.as_deref(), is_term) {
            Palette::colored()
        } else {
            Palette::plain()
        }
    })
}
