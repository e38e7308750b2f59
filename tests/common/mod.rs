#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cinesearch::catalog::{self, Catalog};
use cinesearch::config::FailurePolicy;
use cinesearch::embed::{Embedder, Embedding};
use cinesearch::error::ProviderError;
use cinesearch::ingest::{self, IngestOptions, IngestReport};
use cinesearch::store::VectorStore;

pub const KEYWORD_LIMIT: usize = 20;

/// Bag-of-words hashing embedder: shared words mean similar vectors.
pub struct WordHashEmbedder {
    pub dims: usize,
}

impl Embedder for WordHashEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
            v[bucket % self.dims] += 1.0;
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "word-hash"
    }
}

const MOVIES_CSV: &str = r#"adult,budget,genres,id,overview,poster_path,release_date,title,vote_average,vote_count
False,200000000,"[{'id': 18, 'name': 'Drama'}, {'id': 10749, 'name': 'Romance'}]",597,"101-year-old Rose DeWitt Bukater tells the story of her life aboard the Titanic, 84 years later. A young Rose boards the ship with her mother and fiance.",/9xjZS2rlVxm8SFx8kPC3aIGCOYQ.jpg,1997-11-18,Titanic,7.5,7770.0
False,30000000,"[{'id': 16, 'name': 'Animation'}, {'id': 35, 'name': 'Comedy'}, {'id': 10751, 'name': 'Family'}]",862,"Led by Woody, Andy's toys live happily in his room until Andy's birthday brings Buzz Lightyear onto the scene.",/rhIRbceoE9lR4veEXuwCC2wARtG.jpg,1995-10-30,Toy Story,7.7,5415.0
False,60000000,"[{'id': 28, 'name': 'Action'}, {'id': 80, 'name': 'Crime'}]",949,"Obsessive master thief Neil McCauley leads a top-notch crew on various daring heists throughout Los Angeles.",/zMyfPUelumio3tiDKPffaUpsQTD.jpg,1995-12-15,Heat,7.7,1886.0
False,11000000,"[{'id': 27, 'name': 'Horror'}, {'id': 878, 'name': 'Science Fiction'}]",348,"During its return to the earth, commercial spaceship Nostromo intercepts a distress signal from a distant planet.",nan,1979-05-25,Alien,7.9,4564.0
False,0,[],1997-08-20,"a row whose id column holds a date",,,Broken,,
False,0,[],100,Too short.,,,Short,,
False,0,[],597,"A later duplicate of the Titanic row that must be ignored entirely.",,,Titanic (dup),,
False,0,[],101,"An overview long enough but the title is missing here.",,,,,
"#;

const KEYWORDS_CSV: &str = r#"id,keywords
597,"[{'id': 2580, 'name': 'shipwreck'}, {'id': 1, 'name': 'iceberg'}, {'id': 2, 'name': 'ocean liner'}]"
862,"[{'id': 931, 'name': 'jealousy'}, {'id': 4290, 'name': 'toy'}]"
949,"[{'id': 642, 'name': 'robbery'}, {'id': 703, 'name': 'detective'}]"
"#;

/// Writes the fixture CSVs into `dir` and returns their paths.
pub fn write_fixtures(dir: &Path) -> (PathBuf, PathBuf) {
    let movies = dir.join("movies_metadata.csv");
    let keywords = dir.join("keywords.csv");
    std::fs::write(&movies, MOVIES_CSV).unwrap();
    std::fs::write(&keywords, KEYWORDS_CSV).unwrap();
    (movies, keywords)
}

pub fn load_fixture_catalog(dir: &Path) -> Catalog {
    let (movies, keywords) = write_fixtures(dir);
    catalog::load(&movies, Some(&keywords), KEYWORD_LIMIT).unwrap()
}

pub fn options(batch_size: usize) -> IngestOptions {
    IngestOptions {
        batch_size,
        max_concurrent: 2,
        keyword_limit: KEYWORD_LIMIT,
        max_retries: 1,
        retry_backoff: std::time::Duration::ZERO,
        on_failure: FailurePolicy::Abort,
        resume_from: 0,
    }
}

pub fn ingest_into<S: VectorStore>(catalog: &Catalog, embedder: &dyn Embedder, store: &mut S) -> IngestReport {
    ingest::run(catalog, embedder, store, &options(2), &mut |_| {})
}
