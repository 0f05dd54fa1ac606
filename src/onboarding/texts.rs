//! Localized texts, keyboards and callback choices.

use crate::onboarding::transport::{Button, Keyboard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    Ru,
    En,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Ru, Language::En];

    pub fn code(self) -> &'static str {
        match self {
            Language::Ru => "ru",
            Language::En => "en",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|lang| lang.code() == code)
    }

    /// Stored code, falling back to the default for empty or unknown values.
    pub fn from_stored(code: &str) -> Self {
        Self::from_code(code).unwrap_or_default()
    }

    fn label(self) -> &'static str {
        match self {
            Language::Ru => "🇷🇺 Русский",
            Language::En => "🇬🇧 English",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKey {
    SelectLanguage,
    ChangeLanguage,
    /// Placeholders: `{full_name}`, `{request_id}`.
    MainMenu,
    GetToKnowUs,
    Source,
    ThanksFeedback,
    AlreadyRecorded,
    GreetingMorning,
    GreetingDay,
    GreetingEvening,
    GreetingNight,
    ReadyToHelp,
}

pub fn text(language: Language, key: TextKey) -> &'static str {
    match language {
        Language::Ru => match key {
            TextKey::SelectLanguage => "👋 Здравствуйте, {full_name}!\n\nВыберите язык:",
            TextKey::ChangeLanguage => "Выберите новый язык:",
            TextKey::MainMenu => {
                "Здравствуйте, {full_name}!\n\nВаша заявка <b>№{request_id}</b> принята. \
                 Менеджер свяжется с вами в ближайшее время."
            }
            TextKey::GetToKnowUs => "Давайте познакомимся поближе! Откуда вы о нас узнали?",
            TextKey::Source => "Исходный код бота доступен по запросу у администратора.",
            TextKey::ThanksFeedback => "Спасибо за ответ! 🙏",
            TextKey::AlreadyRecorded => "Ваш ответ уже записан, спасибо!",
            TextKey::GreetingMorning => "Доброе утро! ☀️",
            TextKey::GreetingDay => "Добрый день! 👋",
            TextKey::GreetingEvening => "Добрый вечер! 🌆",
            TextKey::GreetingNight => "Доброй ночи! 🌙",
            TextKey::ReadyToHelp => {
                "Мы также проводим корпоративные обучения. Напишите нам, если хотите узнать подробнее, \
                 мы готовы помочь!"
            }
        },
        Language::En => match key {
            TextKey::SelectLanguage => "👋 Hello, {full_name}!\n\nPlease choose a language:",
            TextKey::ChangeLanguage => "Choose a new language:",
            TextKey::MainMenu => {
                "Hello, {full_name}!\n\nYour request <b>#{request_id}</b> has been received. \
                 A manager will contact you shortly."
            }
            TextKey::GetToKnowUs => "Let's get to know each other! How did you hear about us?",
            TextKey::Source => "The bot's source code is available from the administrator on request.",
            TextKey::ThanksFeedback => "Thank you for your answer! 🙏",
            TextKey::AlreadyRecorded => "Your answer has already been recorded, thank you!",
            TextKey::GreetingMorning => "Good morning! ☀️",
            TextKey::GreetingDay => "Good afternoon! 👋",
            TextKey::GreetingEvening => "Good evening! 🌆",
            TextKey::GreetingNight => "Good night! 🌙",
            TextKey::ReadyToHelp => {
                "We also run corporate trainings. Message us if you want to know more, we are ready to help!"
            }
        },
    }
}

/// Online acquisition channels offered after "Online".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineSource {
    Telegram,
    Instagram,
    Facebook,
    Google,
    Blogger,
}

impl OnlineSource {
    pub const ALL: [OnlineSource; 5] = [
        OnlineSource::Telegram,
        OnlineSource::Instagram,
        OnlineSource::Facebook,
        OnlineSource::Google,
        OnlineSource::Blogger,
    ];

    pub fn callback_data(self) -> &'static str {
        match self {
            OnlineSource::Telegram => "source_telegram",
            OnlineSource::Instagram => "source_instagram",
            OnlineSource::Facebook => "source_facebook",
            OnlineSource::Google => "source_google",
            OnlineSource::Blogger => "source_blogger",
        }
    }

    fn label(self, language: Language) -> &'static str {
        match (language, self) {
            (Language::Ru, OnlineSource::Telegram) => "Телеграм-каналы / реклама",
            (Language::Ru, OnlineSource::Instagram) => "Инстаграм (реклама или подписка)",
            (Language::Ru, OnlineSource::Facebook) => "Facebook реклама",
            (Language::Ru, OnlineSource::Google) => "Поиск Google",
            (Language::Ru, OnlineSource::Blogger) => "Увидел у блогера",
            (Language::En, OnlineSource::Telegram) => "Telegram channels / ads",
            (Language::En, OnlineSource::Instagram) => "Instagram (ads or following)",
            (Language::En, OnlineSource::Facebook) => "Facebook ads",
            (Language::En, OnlineSource::Google) => "Google search",
            (Language::En, OnlineSource::Blogger) => "Saw it at a blogger's",
        }
    }
}

pub const SOURCE_ONLINE: &str = "source_online";
pub const SOURCE_OFFLINE: &str = "source_offline";

/// A parsed inline button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Language(Language),
    SourceOnline,
    SourceOffline,
    Source(OnlineSource),
}

impl Choice {
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(language) = Language::from_code(data) {
            return Some(Choice::Language(language));
        }
        match data {
            SOURCE_ONLINE => Some(Choice::SourceOnline),
            SOURCE_OFFLINE => Some(Choice::SourceOffline),
            _ => OnlineSource::ALL
                .into_iter()
                .find(|source| source.callback_data() == data)
                .map(Choice::Source),
        }
    }
}

/// Two languages per row.
pub fn language_keyboard() -> Keyboard {
    Language::ALL.chunks(2).fold(Keyboard::default(), |keyboard, chunk| {
        keyboard.row(chunk.iter().map(|lang| Button::new(lang.label(), lang.code())).collect())
    })
}

pub fn source_type_keyboard(language: Language) -> Keyboard {
    let (online, offline) = match language {
        Language::Ru => ("Онлайн", "Офлайн"),
        Language::En => ("Online", "Offline"),
    };
    Keyboard::default().row(vec![Button::new(online, SOURCE_ONLINE), Button::new(offline, SOURCE_OFFLINE)])
}

/// One source per row.
pub fn online_sources_keyboard(language: Language) -> Keyboard {
    OnlineSource::ALL.into_iter().fold(Keyboard::default(), |keyboard, source| {
        keyboard.row(vec![Button::new(source.label(language), source.callback_data())])
    })
}
