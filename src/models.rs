use diesel::prelude::*;
use serde::Serialize;

pub type TeamId = i32;
pub type LevelId = u8;
pub type RunId = uuid::Uuid;

pub const LEVEL_COUNT: usize = 4;

#[derive(Queryable, Selectable, Serialize, Clone, Debug, PartialEq)]
#[diesel(table_name = crate::schema::teams)]
pub struct TeamRecord {
    pub id: TeamId,
    pub team_name: String,
    pub overall_time_sec: f64,
    pub prompt1: Option<String>,
    pub prompt2: Option<String>,
    pub prompt3: Option<String>,
    pub prompt4: Option<String>,
}

impl TeamRecord {
    pub fn prompts(&self) -> [Option<&str>; LEVEL_COUNT] {
        [
            self.prompt1.as_deref(),
            self.prompt2.as_deref(),
            self.prompt3.as_deref(),
            self.prompt4.as_deref(),
        ]
    }
}

#[derive(Insertable, Clone, Debug, PartialEq)]
#[diesel(table_name = crate::schema::teams)]
pub struct NewTeam {
    pub team_name: String,
    pub overall_time_sec: f64,
    pub prompt1: Option<String>,
    pub prompt2: Option<String>,
    pub prompt3: Option<String>,
    pub prompt4: Option<String>,
}

impl NewTeam {
    pub fn new(team_name: impl Into<String>, overall_time_sec: f64) -> Self {
        Self {
            team_name: team_name.into(),
            overall_time_sec,
            prompt1: None,
            prompt2: None,
            prompt3: None,
            prompt4: None,
        }
    }

    pub fn with_prompts(mut self, prompts: [Option<String>; LEVEL_COUNT]) -> Self {
        let [p1, p2, p3, p4] = prompts;
        self.prompt1 = p1;
        self.prompt2 = p2;
        self.prompt3 = p3;
        self.prompt4 = p4;
        self
    }
}
