use std::sync::LazyLock;

use regex::Regex;

static EVENT_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(event|arrangement|workshop|seminar|lecture|foredrag|kurs|meetup|hackathon|party|fest|quiz|konsert|concert|bedpres|bedriftspresentasjon|career fair|karrieredag|game night|spillkveld|talk|conference|konferanse|kickoff|lunsj|lunch|frokost|breakfast|dinner|middag|welcome|velkommen|join us|bli med|meld deg på|påmelding|sign up|register|registration|tickets|billetter|doors open|dørene åpner)\b",
    )
    .expect("valid regex")
});

static NEGATIVE_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(selges|til salgs|for sale|selling|kjøpes|wts|wtb|gis bort|stilling ledig|ledig stilling|we are hiring|we're hiring|job opening|søknadsfrist|apply now|mistet|lost and found|hittegods|funnet|found a|borte|leilighet|rom til leie|room for rent)\b",
    )
    .expect("valid regex")
});

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        \b\d{4}-\d{2}-\d{2}\b
        | \b\d{1,2}\.\d{1,2}(\.\d{2,4})?\b
        | \b\d{1,2}\.?\s+(jan|feb|mar|apr|mai|may|jun|jul|aug|sep|okt|oct|nov|des|dec)[a-z]*\b
        | \b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\s+\d{1,2}(st|nd|rd|th)?\b
        | \b(i\s+dag|i\s+morgen|today|tonight|tomorrow|mandag|tirsdag|onsdag|torsdag|fredag|lørdag|søndag|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b
        ",
    )
    .expect("valid regex")
});

static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([01]?\d|2[0-3])[:.][0-5]\d\b|\bkl\.?\s*\d{1,2}\b|\b\d{1,2}\s*(am|pm)\b")
        .expect("valid regex")
});

static EVENT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)facebook\.com/events/\d+|peoply\.app/events/|ifinavet\.no/").expect("valid regex")
});

/// Cheap textual evidence gathered before any deep classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    pub event_words: usize,
    pub negative_words: usize,
    pub has_date: bool,
    pub has_time: bool,
    pub event_link: bool,
}

impl Signals {
    pub fn scan(text: &str) -> Self {
        Self {
            event_words: EVENT_WORDS.find_iter(text).count(),
            negative_words: NEGATIVE_WORDS.find_iter(text).count(),
            has_date: DATE_PATTERN.is_match(text),
            has_time: TIME_PATTERN.is_match(text),
            event_link: EVENT_LINK.is_match(text),
        }
    }

    /// Reason the post is obviously not an event, if it is.
    pub fn obvious_negative(&self) -> Option<&'static str> {
        if self.event_link {
            return None;
        }
        if self.negative_words > 0 && !self.has_date {
            return Some("sale, job or lost-and-found vocabulary without a date");
        }
        if !self.has_date && !self.has_time && self.event_words == 0 {
            return Some("no date, time or event vocabulary");
        }
        None
    }

    /// Rough prior for a post that survived the heuristic pass.
    pub fn confidence(&self) -> f64 {
        let mut score = 0.3;
        if self.has_date {
            score += 0.2;
        }
        if self.has_time {
            score += 0.15;
        }
        if self.event_link {
            score += 0.2;
        }
        score += 0.05 * self.event_words.min(3) as f64;
        score -= 0.1 * self.negative_words.min(3) as f64;
        score.clamp(0.05, 0.95)
    }

    pub fn describe(&self) -> String {
        format!(
            "heuristics: {} event words, {} negative words, date {}, time {}, event link {}",
            self.event_words,
            self.negative_words,
            yes_no(self.has_date),
            yes_no(self.has_time),
            yes_no(self.event_link)
        )
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_announcement_is_promising() {
        let s = Signals::scan("Velkommen til bedpres med Bekk! 12.03 kl. 17:15 i Lille Aud");
        assert!(s.has_date);
        assert!(s.has_time);
        assert!(s.event_words >= 2);
        assert_eq!(s.obvious_negative(), None);
        assert!(s.confidence() > 0.6);
    }

    #[test]
    fn chatter_is_obviously_negative() {
        let s = Signals::scan("Anyone know where the printer on the third floor went?");
        assert!(s.obvious_negative().is_some());
    }

    #[test]
    fn sale_without_date_is_negative() {
        let s = Signals::scan("Selges: lite brukt sykkel, 500 kr. Send meg en melding!");
        assert_eq!(
            s.obvious_negative(),
            Some("sale, job or lost-and-found vocabulary without a date")
        );
    }

    #[test]
    fn facebook_event_link_is_never_dismissed() {
        let s = Signals::scan("Selges billetter: https://www.facebook.com/events/123456789/");
        assert_eq!(s.obvious_negative(), None);
    }
}
