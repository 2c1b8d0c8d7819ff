//! Upcoming tracks of a session. The playing track is never part of it.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{LavaError, LavaResult};
use crate::track::Track;

#[derive(Debug, Clone, Default)]
pub(crate) struct Queue {
    tracks: VecDeque<Track>,
}

impl Queue {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn push(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    pub fn insert(&mut self, index: usize, track: Track) -> LavaResult<()> {
        if index > self.tracks.len() {
            return Err(out_of_range(index, self.tracks.len() + 1));
        }
        self.tracks.insert(index, track);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> LavaResult<Track> {
        let len = self.tracks.len();
        self.tracks
            .remove(index)
            .ok_or_else(|| out_of_range(index, len))
    }

    /// Moves the entry at `from` so that it ends up at index `to`.
    pub fn move_track(&mut self, from: usize, to: usize) -> LavaResult<()> {
        let len = self.tracks.len();
        if to >= len {
            return Err(out_of_range(to, len));
        }
        let track = self.remove(from)?;
        self.tracks.insert(to, track);
        Ok(())
    }

    pub fn shuffle(&mut self) {
        self.tracks.make_contiguous().shuffle(&mut rand::rng());
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Takes the next track: the head, or a random entry when `random`.
    pub fn pop_next(&mut self, random: bool) -> Option<Track> {
        if random && self.tracks.len() > 1 {
            let index = rand::rng().random_range(0..self.tracks.len());
            return self.tracks.remove(index);
        }
        self.tracks.pop_front()
    }

    pub fn to_vec(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }
}

fn out_of_range(index: usize, len: usize) -> LavaError {
    LavaError::Validation(format!("queue index {index} out of range (len {len})"))
}
