// Copyright 2017 The Australian National University
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// u64

#[inline(always)]
pub fn set_nth_bit_u64(value: u64, index: usize, set_value: u8) -> u64 {
    value ^ (((-(set_value as i64) as u64) ^ value) & (1 << index))
}

#[inline(always)]
pub fn test_nth_bit_u64(value: u64, index: usize, val: u8) -> bool {
    ((value >> index) & 1) as u8 == val
}

#[inline(always)]
pub fn lower_bits_u64(value: u64, len: usize) -> u64 {
    value & ((1 << len) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_set_bit() {
        let a = 0b0000u64;
        let b = 0b1111u64;

        assert_eq!(set_nth_bit_u64(a, 2, 1), 0b100);
        assert_eq!(set_nth_bit_u64(b, 2, 0), 0b1011);
    }

    #[test]
    pub fn test_test_bit() {
        let v = 0b1010u64;

        assert!(test_nth_bit_u64(v, 1, 1));
        assert!(test_nth_bit_u64(v, 2, 0));
    }

    #[test]
    pub fn test_lower_bits() {
        assert_eq!(lower_bits_u64(0b1100_0011, 6), 0b00_0011);
    }
}
