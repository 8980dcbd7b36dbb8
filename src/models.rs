use chrono::NaiveDate;

// One grade as it will be shown in the report. Text fields stay text so that
// markers such as "Abs" or "N.Not" survive untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GradeRecord {
    pub subject: String,
    pub value: Option<String>,
    pub max_value: Option<String>,
    pub date: Option<NaiveDate>,
    pub comment: Option<String>,
    pub coefficient: Option<String>,
    pub is_bonus: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildGrades {
    pub name: String,
    pub grades: Vec<GradeRecord>,
}

/// Grades of every child linked to the account, keyed by display name.
///
/// Children keep the order in which they were inserted. Inserting a name
/// that already exists replaces its grades in place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChildReportSet {
    children: Vec<ChildGrades>,
}

impl ChildReportSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, grades: Vec<GradeRecord>) {
        let name = name.into();
        match self.children.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.grades = grades,
            None => self.children.push(ChildGrades { name, grades }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[GradeRecord]> {
        self.children
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.grades.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildGrades> {
        self.children.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn total_grades(&self) -> usize {
        self.children.iter().map(|c| c.grades.len()).sum()
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<GradeRecord>)> for ChildReportSet {
    fn from_iter<I: IntoIterator<Item = (S, Vec<GradeRecord>)>>(iter: I) -> Self {
        let mut set = ChildReportSet::new();
        for (name, grades) in iter {
            set.insert(name, grades);
        }
        set
    }
}

// Every rendering of one report, built once and only read afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedReport {
    pub subject: String,
    pub text: String,
    pub html: String,
    // Compact rendering for chat channels, one line per grade.
    pub chat: String,
}
