//! Request localization options, computed once from the configured languages
//! and recomputed after the languages change.
//!
//! [`RequestLocalizationOptionsProvider`] keeps the options in a
//! [`Slot`][slot], so concurrent requests arriving while the options are being
//! computed wait for that one computation. A [`LanguageChanged`] event, local or
//! delivered through an [`InvalidationBus`][bus], clears the slot.
//!
//! [slot]: ../future/struct.Slot.html
//! [bus]: ../notification/struct.InvalidationBus.html

use crate::{future::Slot, InvalidationHandler, InvalidationSignal};

use futures_util::{future::BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::{future::Future, sync::Arc};

const DEFAULT_CULTURE: &str = "en";

/// Errors raised by a [`LanguageSource`].
pub type SourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum LocalizationError {
    #[error("failed to read the available languages: {0}")]
    Languages(#[source] SourceError),

    #[error("failed to read the default language setting: {0}")]
    DefaultLanguageSetting(#[source] SourceError),
}

/// A language the application can be used in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LanguageInfo {
    /// Name of the culture used to format dates, numbers and so on.
    pub culture_name: String,
    /// Name of the culture used to look up translated texts.
    pub ui_culture_name: String,
}

impl LanguageInfo {
    pub fn new(culture_name: impl Into<String>, ui_culture_name: impl Into<String>) -> Self {
        Self {
            culture_name: culture_name.into(),
            ui_culture_name: ui_culture_name.into(),
        }
    }
}

/// Where the languages and the default language setting come from.
pub trait LanguageSource: Send + Sync {
    /// Returns the available languages, in display order.
    fn languages(&self) -> BoxFuture<'_, Result<Vec<LanguageInfo>, SourceError>>;

    /// Returns the default language setting: `"culture;ui-culture"`, `"culture"`,
    /// or `None` when it is not set.
    fn default_language_setting(&self) -> BoxFuture<'_, Result<Option<String>, SourceError>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestCulture {
    pub culture: String,
    pub ui_culture: String,
}

impl RequestCulture {
    pub fn new(culture: impl Into<String>, ui_culture: impl Into<String>) -> Self {
        Self {
            culture: culture.into(),
            ui_culture: ui_culture.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestLocalizationOptions {
    pub default_request_culture: RequestCulture,
    pub supported_cultures: Vec<String>,
    pub supported_ui_cultures: Vec<String>,
}

impl Default for RequestLocalizationOptions {
    fn default() -> Self {
        Self {
            default_request_culture: RequestCulture::new(DEFAULT_CULTURE, DEFAULT_CULTURE),
            supported_cultures: vec![DEFAULT_CULTURE.to_string()],
            supported_ui_cultures: vec![DEFAULT_CULTURE.to_string()],
        }
    }
}

impl RequestLocalizationOptions {
    /// Derives the options from the available languages and the default
    /// language setting.
    pub fn from_languages(languages: &[LanguageInfo], default_language: Option<&str>) -> Self {
        if languages.is_empty() {
            return Self::default();
        }
        Self {
            default_request_culture: default_request_culture(default_language, languages),
            supported_cultures: distinct(languages.iter().map(|l| &l.culture_name)),
            supported_ui_cultures: distinct(languages.iter().map(|l| &l.ui_culture_name)),
        }
    }
}

/// Published by whoever adds, removes or edits a language.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LanguageChanged;

/// Adjusts the computed options before they are cached. May await, for example
/// to read settings of its own.
pub type Configurator = Arc<
    dyn Fn(RequestLocalizationOptions) -> BoxFuture<'static, RequestLocalizationOptions>
        + Send
        + Sync
        + 'static,
>;

type OptionsAction = Arc<dyn Fn(&mut RequestLocalizationOptions) + Send + Sync + 'static>;

/// Provides the [`RequestLocalizationOptions`] of the application.
///
/// # Examples
///
/// ```rust
/// use flightcache::localization::{
///     LanguageChanged, LanguageInfo, LanguageSource, RequestLocalizationOptionsProvider,
///     SourceError,
/// };
/// use futures_util::{future::BoxFuture, FutureExt};
///
/// struct Fixed;
///
/// impl LanguageSource for Fixed {
///     fn languages(&self) -> BoxFuture<'_, Result<Vec<LanguageInfo>, SourceError>> {
///         async { Ok(vec![LanguageInfo::new("en", "en"), LanguageInfo::new("fr", "fr")]) }.boxed()
///     }
///
///     fn default_language_setting(&self) -> BoxFuture<'_, Result<Option<String>, SourceError>> {
///         async { Ok(Some("fr;fr".to_string())) }.boxed()
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let provider = RequestLocalizationOptionsProvider::new(Fixed);
/// let options = provider.get_localization_options().await.unwrap();
/// assert_eq!(options.default_request_culture.culture, "fr");
/// assert_eq!(options.supported_cultures, vec!["en", "fr"]);
///
/// // Recomputed on the next call.
/// provider.handle_language_changed(LanguageChanged);
/// # }
/// ```
pub struct RequestLocalizationOptionsProvider {
    source: Box<dyn LanguageSource>,
    configurators: Vec<Configurator>,
    options_action: RwLock<Option<OptionsAction>>,
    slot: Slot<Arc<RequestLocalizationOptions>>,
}

impl RequestLocalizationOptionsProvider {
    pub fn new(source: impl LanguageSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            configurators: Vec::new(),
            options_action: RwLock::new(None),
            slot: crate::future::Cache::<(), Arc<RequestLocalizationOptions>>::builder()
                .name("request-localization-options")
                .build_slot(),
        }
    }

    /// Adds a configurator. Configurators run in the order they were added,
    /// before the action set by
    /// [`init_localization_options`](#method.init_localization_options).
    pub fn with_configurator<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RequestLocalizationOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RequestLocalizationOptions> + Send + 'static,
    {
        self.configurators.push(Arc::new(move |options| f(options).boxed()));
        self
    }

    /// Sets the action applied last to the computed options, replacing the
    /// previous one. Options that are already cached are not affected.
    pub fn init_localization_options(
        &self,
        action: impl Fn(&mut RequestLocalizationOptions) + Send + Sync + 'static,
    ) {
        *self.options_action.write() = Some(Arc::new(action));
    }

    /// Returns the cached options, computing them first if needed.
    ///
    /// A failure of the language source is returned to every caller that was
    /// waiting for the computation, and is not cached.
    pub async fn get_localization_options(
        &self,
    ) -> Result<Arc<RequestLocalizationOptions>, Arc<LocalizationError>> {
        self.slot.try_get_with(self.compute()).await
    }

    pub fn handle_language_changed(&self, _event: LanguageChanged) {
        #[cfg(feature = "logging")]
        log::debug!("Languages changed; discarding the request localization options");

        self.slot.invalidate();
    }

    async fn compute(&self) -> Result<Arc<RequestLocalizationOptions>, LocalizationError> {
        let languages = self
            .source
            .languages()
            .await
            .map_err(LocalizationError::Languages)?;
        let default_language = self
            .source
            .default_language_setting()
            .await
            .map_err(LocalizationError::DefaultLanguageSetting)?;

        let mut options =
            RequestLocalizationOptions::from_languages(&languages, default_language.as_deref());
        for configurator in &self.configurators {
            options = configurator(options).await;
        }
        let action = self.options_action.read().clone();
        if let Some(action) = action {
            action(&mut options);
        }
        Ok(Arc::new(options))
    }
}

impl InvalidationHandler<()> for RequestLocalizationOptionsProvider {
    fn on_invalidation(&self, _signal: InvalidationSignal<()>) {
        self.handle_language_changed(LanguageChanged);
    }
}

/// Splits a language setting into its culture and UI culture names.
fn parse_language_setting(setting: &str) -> (&str, &str) {
    match setting.split_once(';') {
        Some((culture, ui_culture)) => (culture, ui_culture),
        None => (setting, setting),
    }
}

fn default_request_culture(setting: Option<&str>, languages: &[LanguageInfo]) -> RequestCulture {
    let first = || {
        languages
            .first()
            .map(|l| RequestCulture::new(&l.culture_name, &l.ui_culture_name))
            .unwrap_or_else(|| RequestCulture::new(DEFAULT_CULTURE, DEFAULT_CULTURE))
    };

    let Some(setting) = setting else {
        return first();
    };
    let (culture, ui_culture) = parse_language_setting(setting);
    if !languages.is_empty() && languages.iter().all(|l| l.culture_name != culture) {
        return first();
    }
    RequestCulture::new(culture, ui_culture)
}

fn distinct<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.contains(name) {
            out.push(name.clone());
        }
    }
    out
}
